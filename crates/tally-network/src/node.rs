//! Overlay node
//!
//! Ties the listener, the per-connection read loops, membership, gossip and
//! the ledger together. A `Node` is a cheap handle; clones share state.

use crate::codec::{Message, DEFAULT_MAX_FRAME_SIZE};
use crate::connection::{self, ConnectionGuard, ConnectionInfo, ConnectionRegistry, Direction};
use crate::error::{NetworkError, NetworkResult};
use crate::gossip::{FloodReport, Gossip};
use crate::membership::{Membership, MembershipState};
use parking_lot::RwLock;
use std::collections::{BTreeSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tally_ledger::{Ledger, LedgerPolicy};
use tally_types::SignedTransaction;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Default number of received messages kept in memory
pub const DEFAULT_MAX_HISTORY: usize = 10_000;

/// Node network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Interface the listener binds to
    pub listen_host: IpAddr,
    /// Preferred port, 0 for an OS-chosen one
    pub port: u16,
    /// IP advertised to peers; probed from the outbound route when unset
    pub advertise_ip: Option<IpAddr>,
    /// Bind attempts before giving up on port conflicts
    pub max_bind_attempts: usize,
    /// How long a join waits for a peer list
    pub join_timeout: Duration,
    /// Deadline for one dial-and-write
    pub send_timeout: Duration,
    /// Deadline for a whole flood
    pub flood_deadline: Duration,
    /// Sends in flight at once during a flood
    pub max_concurrent_sends: usize,
    /// Largest accepted frame payload
    pub max_frame_size: usize,
    /// Received messages retained for inspection; older ones are evicted
    pub max_history: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            advertise_ip: None,
            max_bind_attempts: 16,
            join_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
            flood_deadline: Duration::from_secs(10),
            max_concurrent_sends: 32,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl NetworkConfig {
    /// Loopback-only configuration, used for local overlays and tests
    pub fn loopback() -> Self {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            listen_host: localhost,
            advertise_ip: Some(localhost),
            ..Self::default()
        }
    }

    /// Set the preferred port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the listen interface
    pub fn with_listen_host(mut self, host: IpAddr) -> Self {
        self.listen_host = host;
        self
    }

    /// Set the advertised IP
    pub fn with_advertise_ip(mut self, ip: IpAddr) -> Self {
        self.advertise_ip = Some(ip);
        self
    }

    /// Set the join timeout
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Set the per-send timeout
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the flood deadline
    pub fn with_flood_deadline(mut self, deadline: Duration) -> Self {
        self.flood_deadline = deadline;
        self
    }

    /// Set the flood concurrency cap
    pub fn with_max_concurrent_sends(mut self, n: usize) -> Self {
        self.max_concurrent_sends = n;
        self
    }

    /// Set how many received messages are retained
    pub fn with_max_history(mut self, n: usize) -> Self {
        self.max_history = n;
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> NetworkResult<()> {
        if self.max_bind_attempts == 0 {
            return Err(NetworkError::Config("max_bind_attempts must be at least 1".into()));
        }
        if self.max_concurrent_sends == 0 {
            return Err(NetworkError::Config(
                "max_concurrent_sends must be at least 1".into(),
            ));
        }
        if self.join_timeout.is_zero() || self.send_timeout.is_zero() || self.flood_deadline.is_zero()
        {
            return Err(NetworkError::Config("timeouts must be non-zero".into()));
        }
        if self.max_frame_size == 0 {
            return Err(NetworkError::Config("max_frame_size must be non-zero".into()));
        }
        if self.max_history == 0 {
            return Err(NetworkError::Config("max_history must be at least 1".into()));
        }
        Ok(())
    }
}

/// Received messages in arrival order, keeping only the newest `capacity`
///
/// Indices are absolute: the n-th message ever received keeps index n after
/// older entries are evicted.
#[derive(Debug)]
struct MessageHistory {
    entries: VecDeque<Message>,
    evicted: usize,
    capacity: usize,
}

impl MessageHistory {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            evicted: 0,
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, msg: Message) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(msg);
    }

    fn total(&self) -> usize {
        self.evicted + self.entries.len()
    }

    fn get(&self, index: usize) -> NetworkResult<Message> {
        if index < self.evicted {
            return Err(NetworkError::MessageEvicted {
                index,
                oldest: self.evicted,
            });
        }
        self.entries
            .get(index - self.evicted)
            .cloned()
            .ok_or(NetworkError::IndexOutOfBounds {
                index,
                len: self.total(),
            })
    }
}

/// A member of the overlay
#[derive(Clone)]
pub struct Node {
    config: Arc<NetworkConfig>,
    membership: Arc<Membership>,
    connections: Arc<ConnectionRegistry>,
    gossip: Gossip,
    ledger: Arc<Ledger>,
    history: Arc<RwLock<MessageHistory>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Node {
    /// Create an unbound node with a default ledger policy
    pub fn new(config: NetworkConfig) -> Self {
        Self::with_ledger_policy(config, LedgerPolicy::default())
    }

    /// Create an unbound node whose ledger enforces `policy`
    pub fn with_ledger_policy(config: NetworkConfig, policy: LedgerPolicy) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let gossip = Gossip::new(
            connections.clone(),
            config.send_timeout,
            config.flood_deadline,
            config.max_concurrent_sends,
        );
        let (shutdown, _) = watch::channel(false);
        let history = MessageHistory::new(config.max_history);
        Self {
            config: Arc::new(config),
            membership: Arc::new(Membership::new()),
            connections,
            gossip,
            ledger: Arc::new(Ledger::with_policy(policy)),
            history: Arc::new(RwLock::new(history)),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Configuration
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Advertised address, once listening
    pub fn address(&self) -> Option<String> {
        self.membership.address()
    }

    /// Lifecycle state
    pub fn state(&self) -> MembershipState {
        self.membership.state()
    }

    /// Snapshot of known peer addresses, including our own
    pub fn known_peers(&self) -> BTreeSet<String> {
        self.membership.peers().snapshot()
    }

    /// Local ledger replica
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Live inbound connections
    pub fn inbound_count(&self) -> usize {
        self.connections.inbound_count()
    }

    /// Live outbound connections
    pub fn outbound_count(&self) -> usize {
        self.connections.outbound_count()
    }

    /// Snapshot of live connections in one direction
    pub fn connections(&self, direction: Direction) -> Vec<ConnectionInfo> {
        self.connections.connections(direction)
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Number of messages received so far, evicted ones included
    pub fn message_count(&self) -> usize {
        self.history.read().total()
    }

    /// Received message at `index`, in arrival order
    pub fn message(&self, index: usize) -> NetworkResult<Message> {
        self.history.read().get(index)
    }

    /// Retained messages, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.history.read().entries.iter().cloned().collect()
    }

    /// Bind the listener and start accepting connections
    ///
    /// Returns the advertised `host:port`.
    pub async fn listen(&self) -> NetworkResult<String> {
        self.ensure_running()?;
        self.config.validate()?;
        if self.membership.state() != MembershipState::Unbound {
            return Err(NetworkError::InvalidState("listener already bound".into()));
        }

        let listener = connection::bind_listener(
            self.config.listen_host,
            self.config.port,
            self.config.max_bind_attempts,
        )
        .await?;
        let local = listener.local_addr()?;
        let ip = match self.config.advertise_ip {
            Some(ip) => ip,
            None if !self.config.listen_host.is_unspecified() => self.config.listen_host,
            None => connection::outbound_ip().await,
        };
        let address = SocketAddr::new(ip, local.port()).to_string();

        self.membership.bind(address.clone())?;
        info!("Listening on {}, advertised as {}", local, address);

        tokio::spawn(self.clone().accept_loop(listener));
        Ok(address)
    }

    /// Start a new overlay with this node as its only member
    pub async fn create_network(&self) -> NetworkResult<String> {
        let address = self.listen().await?;
        self.membership.found()?;
        info!("Created new overlay at {}", address);
        Ok(address)
    }

    /// Join the overlay `target` belongs to
    ///
    /// Binds a listener first if needed, asks `target` for its peer list and
    /// waits up to `join_timeout` for it, then announces this node to every
    /// known peer.
    pub async fn join(&self, target: &str) -> NetworkResult<()> {
        self.ensure_running()?;
        if self.membership.state() == MembershipState::Unbound {
            self.listen().await?;
        }
        let own = self.membership.require_address()?;
        let peers_rx = self.membership.begin_join()?;
        info!("Joining overlay via {}", target);

        if let Err(e) = self.request_peers(target, &own, peers_rx).await {
            self.membership.abort_join();
            warn!("Join via {} failed: {}", target, e);
            return Err(e);
        }
        self.membership.finish_join();

        let report = self.flood(&Message::JoinRequest { sender: own }).await;
        info!(
            "Joined overlay via {}, announced to {}/{} peers",
            target,
            report.delivered.len(),
            report.attempted()
        );
        Ok(())
    }

    /// Join `target`, or found a new overlay if it cannot be reached
    pub async fn connect(&self, target: &str) -> NetworkResult<()> {
        match self.join(target).await {
            Err(e) if e.is_connection_error() => {
                warn!("{} unreachable ({}), creating a new overlay", target, e);
                if self.membership.state() == MembershipState::Unbound {
                    self.listen().await?;
                }
                self.membership.found()?;
                Ok(())
            }
            other => other,
        }
    }

    /// Send `msg` to every known peer except ourselves
    pub async fn flood(&self, msg: &Message) -> FloodReport {
        let targets = match self.membership.address() {
            Some(own) => self.membership.peers().others(&own),
            None => self.membership.peers().snapshot().into_iter().collect(),
        };
        self.gossip.flood(targets, msg).await
    }

    /// Apply a transaction locally, then flood it
    ///
    /// A transaction the local ledger rejects is not flooded.
    pub async fn flood_transaction(&self, signed_tx: SignedTransaction) -> NetworkResult<FloodReport> {
        let own = self.membership.require_address()?;
        let tx = self.ledger.update(&signed_tx)?;
        debug!("Applied {} locally, flooding", tx.id);
        let msg = Message::Transaction {
            sender: own,
            signed_tx,
        };
        Ok(self.flood(&msg).await)
    }

    /// Send one message to one address
    pub async fn send_to(&self, addr: &str, msg: &Message) -> NetworkResult<()> {
        self.gossip.send_to(addr, msg).await
    }

    /// Stop the accept loop and every read loop
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!(
                "Shutting down node {}",
                self.address().as_deref().unwrap_or("(unbound)")
            );
        }
    }

    fn ensure_running(&self) -> NetworkResult<()> {
        if self.is_shut_down() {
            return Err(NetworkError::InvalidState("node is shut down".into()));
        }
        Ok(())
    }

    async fn request_peers(
        &self,
        target: &str,
        own: &str,
        peers_rx: oneshot::Receiver<BTreeSet<String>>,
    ) -> NetworkResult<()> {
        let request = Message::PeerListRequest {
            sender: own.to_string(),
        };
        {
            let mut stream = connection::dial(target, self.config.send_timeout).await?;
            let _guard = self
                .connections
                .register(stream.peer_addr()?, Direction::Outbound);
            connection::send(&mut stream, &request, self.config.send_timeout).await?;
            if let Err(e) = stream.shutdown().await {
                debug!("Closing join connection to {}: {}", target, e);
            }
        }

        match tokio::time::timeout(self.config.join_timeout, peers_rx).await {
            Ok(Ok(peers)) => {
                debug!("Received {} peers from the overlay", peers.len());
                Ok(())
            }
            Ok(Err(_)) => Err(NetworkError::ChannelClosed),
            Err(_) => Err(NetworkError::JoinTimeout(target.to_string())),
        }
    }

    async fn accept_loop(self, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!("Incoming connection from {}", remote);
                        let guard = self.connections.register(remote, Direction::Inbound);
                        tokio::spawn(self.clone().read_loop(stream, guard));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
        info!("Stopped accepting connections");
    }

    /// Owns `stream` until EOF, a read error or shutdown; the guard
    /// deregisters the connection on every exit path.
    async fn read_loop(self, stream: TcpStream, guard: ConnectionGuard) {
        let remote = guard.info().remote;
        let mut shutdown = self.shutdown.subscribe();
        let mut reader = BufReader::new(stream);

        loop {
            if *shutdown.borrow_and_update() {
                debug!("Closing connection from {} on shutdown", remote);
                break;
            }
            let frame = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                frame = connection::read_frame(&mut reader, self.config.max_frame_size) => frame,
            };

            match frame {
                Ok(Some(payload)) => match Message::from_payload(&payload) {
                    Ok(msg) => self.handle_message(msg),
                    Err(e) => warn!("Dropping undecodable frame from {}: {}", remote, e),
                },
                Ok(None) => {
                    debug!("Connection from {} closed", remote);
                    break;
                }
                Err(e) => {
                    warn!("Read error on connection from {}: {}", remote, e);
                    break;
                }
            }
        }
        drop(guard);
    }

    fn handle_message(&self, msg: Message) {
        debug!("Received {}", msg);
        self.history.write().push(msg.clone());

        match msg {
            Message::PeerListRequest { sender } => self.reply_peer_list(sender),
            Message::PeerListResponse { sender, peers } => {
                if peers.is_empty() {
                    debug!("Ignoring empty peer list from {}", sender);
                    return;
                }
                let added = self.membership.peers().merge(peers.iter().cloned());
                debug!("Merged {} new peers from {}", added, sender);
                if self.membership.complete_join(peers) {
                    info!("Peer list from {} completed the pending join", sender);
                }
            }
            Message::JoinRequest { sender } => {
                if self.membership.peers().insert(sender.clone()) {
                    info!("{} joined the overlay", sender);
                }
            }
            Message::Transaction { sender, signed_tx } => match self.ledger.update(&signed_tx) {
                Ok(tx) => info!(
                    "Applied {} from {}: {} now holds {}",
                    tx.id,
                    sender,
                    short_identity(&tx.from),
                    self.ledger.balance(&tx.from)
                ),
                Err(e) => debug!("Transaction from {} not applied: {}", sender, e),
            },
        }
    }

    /// The reply goes to the requester's listening address on a new
    /// connection, off the read loop.
    fn reply_peer_list(&self, requester: String) {
        let own = match self.membership.address() {
            Some(own) => own,
            None => return,
        };
        let reply = Message::PeerListResponse {
            sender: own,
            peers: self.membership.peers().snapshot(),
        };
        let gossip = self.gossip.clone();
        tokio::spawn(async move {
            if let Err(e) = gossip.send_to(&requester, &reply).await {
                warn!("Failed to send peer list to {}: {}", requester, e);
            }
        });
    }
}

fn short_identity(identity: &str) -> &str {
    identity.get(..12).unwrap_or(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = NetworkConfig::default();
        assert!(config.listen_host.is_unspecified());
        assert_eq!(config.port, 0);
        assert!(config.advertise_ip.is_none());
        assert_eq!(config.max_bind_attempts, 16);
        assert_eq!(config.join_timeout, Duration::from_secs(10));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_sends, 32);
        assert_eq!(config.max_history, DEFAULT_MAX_HISTORY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = NetworkConfig::loopback()
            .with_port(4000)
            .with_join_timeout(Duration::from_millis(300))
            .with_max_concurrent_sends(4);
        assert_eq!(config.port, 4000);
        assert_eq!(config.advertise_ip, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(config.join_timeout, Duration::from_millis(300));
        assert_eq!(config.max_concurrent_sends, 4);
    }

    #[test]
    fn test_config_validate() {
        let mut config = NetworkConfig::default();
        config.max_bind_attempts = 0;
        assert!(matches!(config.validate(), Err(NetworkError::Config(_))));

        let config = NetworkConfig::default().with_send_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = NetworkConfig::default().with_max_concurrent_sends(0);
        assert!(config.validate().is_err());

        let config = NetworkConfig::default().with_max_history(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_starts_unbound() {
        let node = Node::new(NetworkConfig::loopback());
        assert_eq!(node.state(), MembershipState::Unbound);
        assert!(node.address().is_none());
        assert!(node.known_peers().is_empty());
        assert_eq!(node.message_count(), 0);
        assert_eq!(node.ledger().log_len(), 0);
    }

    #[test]
    fn test_message_out_of_bounds() {
        let node = Node::new(NetworkConfig::loopback());
        assert!(matches!(
            node.message(0),
            Err(NetworkError::IndexOutOfBounds { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_history_evicts_oldest() {
        let node = Node::new(NetworkConfig::loopback().with_max_history(3));
        let sent: Vec<Message> = (0..5)
            .map(|i| Message::JoinRequest {
                sender: format!("127.0.0.1:{}", 5000 + i),
            })
            .collect();
        for msg in &sent {
            node.handle_message(msg.clone());
        }

        assert_eq!(node.message_count(), 5);
        assert_eq!(node.messages(), sent[2..].to_vec());
        assert!(matches!(
            node.message(1),
            Err(NetworkError::MessageEvicted { index: 1, oldest: 2 })
        ));
        assert_eq!(node.message(2).unwrap(), sent[2]);
        assert_eq!(node.message(4).unwrap(), sent[4]);
        assert!(matches!(
            node.message(5),
            Err(NetworkError::IndexOutOfBounds { index: 5, len: 5 })
        ));
    }

    #[test]
    fn test_short_identity() {
        assert_eq!(short_identity("abc"), "abc");
        assert_eq!(short_identity("1234567890123456-65537"), "123456789012");
    }

    #[tokio::test]
    async fn test_listen_registers_self() {
        let node = Node::new(NetworkConfig::loopback());
        let addr = node.listen().await.unwrap();

        assert!(addr.starts_with("127.0.0.1:"));
        assert_eq!(node.state(), MembershipState::Listening);
        assert_eq!(node.address(), Some(addr.clone()));
        assert!(node.known_peers().contains(&addr));

        assert!(matches!(
            node.listen().await,
            Err(NetworkError::InvalidState(_))
        ));
        node.shutdown();
    }

    #[tokio::test]
    async fn test_create_network() {
        let node = Node::new(NetworkConfig::loopback());
        let addr = node.create_network().await.unwrap();
        assert_eq!(node.state(), MembershipState::Joined);
        assert_eq!(node.known_peers().len(), 1);
        assert!(node.known_peers().contains(&addr));
        node.shutdown();
    }

    #[tokio::test]
    async fn test_listen_rejects_invalid_config() {
        let mut config = NetworkConfig::loopback();
        config.max_bind_attempts = 0;
        let node = Node::new(config);
        assert!(matches!(node.listen().await, Err(NetworkError::Config(_))));
        assert_eq!(node.state(), MembershipState::Unbound);
    }

    #[tokio::test]
    async fn test_shutdown_blocks_lifecycle() {
        let node = Node::new(NetworkConfig::loopback());
        node.shutdown();
        node.shutdown();
        assert!(node.is_shut_down());
        assert!(matches!(
            node.listen().await,
            Err(NetworkError::InvalidState(_))
        ));
        assert!(node.join("127.0.0.1:1").await.is_err());
    }

    #[tokio::test]
    async fn test_flood_transaction_requires_listener() {
        let node = Node::new(NetworkConfig::loopback());
        let signed = SignedTransaction {
            tx: tally_types::Transaction::new("t1", "a", "b", 1),
            signature: Default::default(),
        };
        assert!(matches!(
            node.flood_transaction(signed).await,
            Err(NetworkError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_flood_alone_is_empty() {
        let node = Node::new(NetworkConfig::loopback());
        let addr = node.create_network().await.unwrap();
        let report = node.flood(&Message::JoinRequest { sender: addr }).await;
        assert_eq!(report.attempted(), 0);
        node.shutdown();
    }
}
