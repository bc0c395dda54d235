//! In-process demo overlay
//!
//! Starts a handful of nodes on loopback, each joining a random earlier node,
//! floods random transfers between generated identities and reports every
//! node's view of the balances.

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tally_crypto::{generate_keypair, PrivateKey, PublicKey};
use tally_ledger::LedgerPolicy;
use tally_network::{NetworkConfig, Node};
use tally_types::{SignedTransaction, Transaction};
use tokio::time::Instant;
use tracing::{info, warn};

/// Demo parameters
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Number of nodes
    pub nodes: usize,
    /// Number of identities
    pub identities: usize,
    /// Number of transfers
    pub transactions: usize,
    /// RSA modulus size
    pub key_bits: u64,
    /// How long to wait for ledgers to converge
    pub settle: Duration,
}

/// One node's view after the demo
#[derive(Debug, Clone)]
pub struct NodeBalances {
    /// Node address
    pub address: String,
    /// Balance per identity, in identity order
    pub balances: Vec<i64>,
    /// Ledger log length
    pub log_len: usize,
}

/// Demo result
#[derive(Debug, Clone)]
pub struct DemoOutcome {
    /// Short labels of the identities
    pub identities: Vec<String>,
    /// Transfers accepted by their originating node
    pub flooded: usize,
    /// Per-node balances
    pub nodes: Vec<NodeBalances>,
}

impl DemoOutcome {
    /// Whether every node reports the same balances
    pub fn converged(&self) -> bool {
        self.nodes
            .windows(2)
            .all(|pair| pair[0].balances == pair[1].balances)
    }

    /// Render a balance table
    pub fn render(&self) -> String {
        let mut out = format!("{:<22}", "node");
        for label in &self.identities {
            out.push_str(&format!(" {:>14}", label));
        }
        out.push('\n');
        for node in &self.nodes {
            out.push_str(&format!("{:<22}", node.address));
            for balance in &node.balances {
                out.push_str(&format!(" {:>14}", balance));
            }
            out.push('\n');
        }
        out
    }
}

struct Identity {
    private_key: PrivateKey,
    public_key: PublicKey,
    label: String,
}

/// Run the demo on loopback, using `base` for timeouts and limits
pub async fn run_demo(
    base: NetworkConfig,
    policy: LedgerPolicy,
    options: &DemoOptions,
) -> Result<DemoOutcome> {
    if options.nodes == 0 {
        bail!("demo needs at least one node");
    }
    if options.identities < 2 {
        bail!("demo needs at least two identities");
    }

    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let config = NetworkConfig {
        listen_host: localhost,
        advertise_ip: Some(localhost),
        port: 0,
        ..base
    };

    let nodes = start_overlay(&config, policy, options.nodes).await?;
    let identities = generate_identities(options.identities, options.key_bits)?;
    let flooded = flood_transfers(&nodes, &identities, options.transactions).await?;

    wait_for_logs(&nodes, flooded, options.settle).await;

    let outcome = DemoOutcome {
        identities: identities.iter().map(|id| id.label.clone()).collect(),
        flooded,
        nodes: nodes
            .iter()
            .map(|node| NodeBalances {
                address: node.address().unwrap_or_default(),
                balances: identities
                    .iter()
                    .map(|id| node.ledger().balance(&id.public_key.to_string()))
                    .collect(),
                log_len: node.ledger().log_len(),
            })
            .collect(),
    };

    for node in &nodes {
        node.shutdown();
    }
    Ok(outcome)
}

async fn start_overlay(
    config: &NetworkConfig,
    policy: LedgerPolicy,
    count: usize,
) -> Result<Vec<Node>> {
    let mut nodes: Vec<Node> = Vec::with_capacity(count);
    let mut addresses: Vec<String> = Vec::with_capacity(count);

    for i in 0..count {
        let node = Node::with_ledger_policy(config.clone(), policy);
        let target = addresses.choose(&mut rand::thread_rng()).cloned();
        match target {
            None => {
                node.create_network().await.context("creating overlay")?;
            }
            Some(target) => {
                node.join(&target)
                    .await
                    .with_context(|| format!("node {} joining via {}", i, target))?;
            }
        }
        let address = node
            .address()
            .context("node has no address after starting")?;
        info!("Demo node {} up at {}", i, address);

        // Later joiners copy the target's peer set, so every member must
        // know this node before the next one joins.
        if !wait_until_known(&nodes, &address, config.join_timeout).await {
            bail!("overlay did not learn about {} in time", address);
        }
        addresses.push(address);
        nodes.push(node);
    }
    Ok(nodes)
}

async fn wait_until_known(nodes: &[Node], address: &str, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if nodes.iter().all(|node| node.known_peers().contains(address)) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn generate_identities(count: usize, bits: u64) -> Result<Vec<Identity>> {
    (0..count)
        .map(|i| {
            let (private_key, public_key) =
                generate_keypair(bits).context("generating demo key pair")?;
            Ok(Identity {
                private_key,
                public_key,
                label: format!("id{}", i),
            })
        })
        .collect()
}

async fn flood_transfers(nodes: &[Node], identities: &[Identity], count: usize) -> Result<usize> {
    let mut flooded = 0;
    for i in 0..count {
        let (signed, origin) = {
            let mut rng = rand::thread_rng();
            let mut pair = identities.choose_multiple(&mut rng, 2);
            let (from, to) = match (pair.next(), pair.next()) {
                (Some(from), Some(to)) => (from, to),
                _ => bail!("not enough identities"),
            };
            let amount = rng.gen_range(1..=100);
            let tx = Transaction::new(
                format!("demo-{}", i),
                from.public_key.to_string(),
                to.public_key.to_string(),
                amount,
            );
            let signed = SignedTransaction::sign(tx, &from.private_key)?;
            let origin = nodes.choose(&mut rng).context("no nodes")?.clone();
            (signed, origin)
        };

        match origin.flood_transaction(signed).await {
            Ok(report) => {
                flooded += 1;
                info!(
                    "Transfer demo-{} reached {}/{} peers",
                    i,
                    report.delivered.len(),
                    report.attempted()
                );
            }
            Err(e) => warn!("Transfer demo-{} not flooded: {}", i, e),
        }
    }
    Ok(flooded)
}

async fn wait_for_logs(nodes: &[Node], expected: usize, settle: Duration) {
    let deadline = Instant::now() + settle;
    while Instant::now() < deadline {
        if nodes.iter().all(|node| node.ledger().log_len() >= expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    warn!("Ledgers still catching up after {:?}", settle);
}
