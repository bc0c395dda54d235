//! Overlay scenarios over real loopback sockets

use std::future::Future;
use std::time::Duration;
use tally_crypto::{generate_keypair, PrivateKey, PublicKey};
use tally_ledger::{LedgerPolicy, LogEntry};
use tally_network::{
    Message, MembershipState, NetworkConfig, NetworkError, Node, LENGTH_PREFIX_LEN,
};
use tally_types::{SignedTransaction, Transaction};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> NetworkConfig {
    NetworkConfig::loopback()
        .with_join_timeout(Duration::from_secs(5))
        .with_send_timeout(Duration::from_secs(2))
        .with_flood_deadline(Duration::from_secs(5))
}

/// Polls `cond` until it holds or ten seconds pass
async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

async fn with_timeout<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(15), fut)
        .await
        .expect("operation timed out")
}

fn keypair() -> (PrivateKey, PublicKey) {
    generate_keypair(512).unwrap()
}

fn transfer(
    id: &str,
    signer: &PrivateKey,
    from: &PublicKey,
    to: &PublicKey,
    amount: i64,
) -> SignedTransaction {
    let tx = Transaction::new(id, from.to_string(), to.to_string(), amount);
    SignedTransaction::sign(tx, signer).unwrap()
}

async fn founder() -> (Node, String) {
    let node = Node::new(config());
    let addr = node.create_network().await.unwrap();
    (node, addr)
}

async fn member_of(target: &str) -> (Node, String) {
    let node = Node::new(config());
    with_timeout(node.join(target)).await.unwrap();
    let addr = node.address().unwrap();
    (node, addr)
}

async fn unused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_membership_convergence() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let (b, b_addr) = member_of(&a_addr).await;

    assert_eq!(b.state(), MembershipState::Joined);
    let b_peers = b.known_peers();
    assert!(b_peers.contains(&a_addr));
    assert!(b_peers.contains(&b_addr));

    assert!(wait_until(|| a.known_peers().contains(&b_addr)).await);
    assert!(a.known_peers().contains(&a_addr));

    a.shutdown();
    b.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_is_recorded_in_history() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let (b, b_addr) = member_of(&a_addr).await;

    assert!(wait_until(|| a.message_count() >= 2).await);
    let history = a.messages();
    assert!(history.contains(&Message::PeerListRequest {
        sender: b_addr.clone()
    }));
    assert!(history.contains(&Message::JoinRequest { sender: b_addr }));

    let first = b.message(0).unwrap();
    assert!(matches!(first, Message::PeerListResponse { ref sender, .. } if *sender == a_addr));
    assert!(matches!(
        b.message(b.message_count()),
        Err(NetworkError::IndexOutOfBounds { .. })
    ));

    a.shutdown();
    b.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transitive_gossip() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let (b, b_addr) = member_of(&a_addr).await;
    let (c, c_addr) = member_of(&b_addr).await;

    assert!(c.known_peers().contains(&a_addr));
    assert!(wait_until(|| a.known_peers().contains(&c_addr)).await);

    let (x_sk, x_pk) = keypair();
    let (_, y_pk) = keypair();
    let signed = transfer("t1", &x_sk, &x_pk, &y_pk, 7);
    let report = with_timeout(a.flood_transaction(signed)).await.unwrap();
    assert!(report.is_complete());

    let y = y_pk.to_string();
    assert!(wait_until(|| c.ledger().balance(&y) == 7).await);
    assert!(wait_until(|| b.ledger().balance(&y) == 7).await);

    a.shutdown();
    b.shutdown();
    c.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_transfer() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let (b, b_addr) = member_of(&a_addr).await;
    assert!(wait_until(|| a.known_peers().contains(&b_addr)).await);

    let (x_sk, x_pk) = keypair();
    let (_, y_pk) = keypair();
    let (x, y) = (x_pk.to_string(), y_pk.to_string());

    let report = with_timeout(a.flood_transaction(transfer("t1", &x_sk, &x_pk, &y_pk, 50)))
        .await
        .unwrap();
    assert_eq!(report.delivered, vec![b_addr]);

    assert_eq!(a.ledger().balance(&x), -50);
    assert_eq!(a.ledger().balance(&y), 50);

    assert!(wait_until(|| b.ledger().balance(&y) == 50).await);
    assert_eq!(b.ledger().balance(&x), -50);
    assert_eq!(
        b.ledger().log_entry(0).unwrap(),
        LogEntry::Applied { id: "t1".into() }
    );

    a.shutdown();
    b.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forged_transfer_rejected_everywhere() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let (b, b_addr) = member_of(&a_addr).await;
    assert!(wait_until(|| a.known_peers().contains(&b_addr)).await);

    let (_, x_pk) = keypair();
    let (_, y_pk) = keypair();
    let (mallory_sk, _) = keypair();
    let forged = transfer("t1", &mallory_sk, &x_pk, &y_pk, 50);

    let err = with_timeout(a.flood_transaction(forged.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::Ledger(_)));

    // Push it past the local check to exercise the receiving side.
    let msg = Message::Transaction {
        sender: a_addr,
        signed_tx: forged,
    };
    let report = with_timeout(a.flood(&msg)).await;
    assert!(report.is_complete());

    assert!(wait_until(|| b.ledger().log_len() == 1).await);
    assert!(!b.ledger().log_entry(0).unwrap().is_applied());
    for node in [&a, &b] {
        assert_eq!(node.ledger().balance(&x_pk.to_string()), 0);
        assert_eq!(node.ledger().balance(&y_pk.to_string()), 0);
    }

    a.shutdown();
    b.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_transfer_applies_twice() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let (b, b_addr) = member_of(&a_addr).await;
    assert!(wait_until(|| a.known_peers().contains(&b_addr)).await);

    let (x_sk, x_pk) = keypair();
    let (_, y_pk) = keypair();
    let signed = transfer("t1", &x_sk, &x_pk, &y_pk, 10);

    with_timeout(a.flood_transaction(signed.clone())).await.unwrap();
    with_timeout(a.flood_transaction(signed)).await.unwrap();

    let y = y_pk.to_string();
    assert_eq!(a.ledger().balance(&y), 20);
    assert!(wait_until(|| b.ledger().balance(&y) == 20).await);
    assert_eq!(b.ledger().log_len(), 2);

    a.shutdown();
    b.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_strict_peer_rejects_zero_amount() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let b = Node::with_ledger_policy(config(), LedgerPolicy::strict());
    with_timeout(b.join(&a_addr)).await.unwrap();
    let b_addr = b.address().unwrap();
    assert!(wait_until(|| a.known_peers().contains(&b_addr)).await);

    let (x_sk, x_pk) = keypair();
    let (_, y_pk) = keypair();
    let signed = transfer("t1", &x_sk, &x_pk, &y_pk, 0);
    let msg = Message::Transaction {
        sender: a_addr,
        signed_tx: signed,
    };
    with_timeout(a.flood(&msg)).await;
    assert!(wait_until(|| b.ledger().log_len() == 1).await);
    assert!(!b.ledger().log_entry(0).unwrap().is_applied());

    a.shutdown();
    b.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_times_out_without_reply() {
    init_tracing();
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = silent.accept().await {
            held.push(stream);
        }
    });

    let node = Node::new(config().with_join_timeout(Duration::from_millis(300)));
    let err = with_timeout(node.join(&silent_addr)).await.unwrap_err();
    assert!(matches!(err, NetworkError::JoinTimeout(ref target) if *target == silent_addr));
    assert_eq!(node.state(), MembershipState::Listening);

    node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_unreachable_target() {
    init_tracing();
    let dead = unused_addr().await;
    let node = Node::new(config());

    let err = with_timeout(node.join(&dead)).await.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(node.state(), MembershipState::Listening);

    node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_creates_overlay_when_unreachable() {
    init_tracing();
    let dead = unused_addr().await;
    let node = Node::new(config());

    with_timeout(node.connect(&dead)).await.unwrap();
    assert_eq!(node.state(), MembershipState::Joined);
    let addr = node.address().unwrap();
    assert_eq!(node.known_peers().into_iter().collect::<Vec<_>>(), vec![addr]);

    node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_joins_reachable_target() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let b = Node::new(config());

    with_timeout(b.connect(&a_addr)).await.unwrap();
    assert!(b.known_peers().contains(&a_addr));

    a.shutdown();
    b.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_frame_is_dropped() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let mut raw = TcpStream::connect(&a_addr).await.unwrap();

    let garbage = b"{not json";
    raw.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
    raw.write_all(garbage).await.unwrap();

    let announce = Message::JoinRequest {
        sender: "127.0.0.1:9".into(),
    };
    raw.write_all(&announce.encode().unwrap()).await.unwrap();

    assert!(wait_until(|| a.known_peers().contains("127.0.0.1:9")).await);
    assert_eq!(a.message_count(), 1);

    a.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversized_frame_closes_connection() {
    init_tracing();
    let node = Node::new(NetworkConfig {
        max_frame_size: 64,
        ..config()
    });
    let addr = node.create_network().await.unwrap();

    let mut raw = TcpStream::connect(&addr).await.unwrap();
    assert!(wait_until(|| node.inbound_count() == 1).await);
    raw.write_all(&1024u32.to_be_bytes()).await.unwrap();

    assert!(wait_until(|| node.inbound_count() == 0).await);
    assert_eq!(node.message_count(), 0);
    node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_closes_connections() {
    init_tracing();
    let (a, a_addr) = founder().await;
    let mut raw = TcpStream::connect(&a_addr).await.unwrap();
    assert!(wait_until(|| a.inbound_count() == 1).await);

    a.shutdown();
    assert!(wait_until(|| a.inbound_count() == 0).await);

    let mut buf = [0u8; LENGTH_PREFIX_LEN];
    let read = with_timeout(raw.read(&mut buf)).await;
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joiners_all_reach_founder() {
    init_tracing();
    let (a, a_addr) = founder().await;

    let mut joins = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let target = a_addr.clone();
        joins.spawn(async move { member_of(&target).await });
    }
    let mut members = Vec::new();
    while let Some(joined) = joins.join_next().await {
        members.push(joined.unwrap());
    }

    for (_, addr) in &members {
        assert!(wait_until(|| a.known_peers().contains(addr)).await);
    }
    assert_eq!(a.known_peers().len(), 5);

    a.shutdown();
    for (node, _) in members {
        node.shutdown();
    }
}
