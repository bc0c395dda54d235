//! Tally node binary
//!
//! `tally run` starts one overlay node; `tally demo` spins up an in-process
//! overlay and prints the replicated balances.

mod cli;
mod config;
mod demo;

use anyhow::Result;
use cli::{Cli, Command, DemoArgs, RunArgs};
use config::NodeConfig;
use demo::{run_demo, DemoOptions};
use std::time::Duration;
use tally_network::Node;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = NodeConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => run_node(config, &args).await,
        Command::Demo(args) => demo(config, &args).await,
    }
}

async fn run_node(mut config: NodeConfig, args: &RunArgs) -> Result<()> {
    config.apply_run_args(args);
    let node = Node::with_ledger_policy(config.network.to_network_config(), config.ledger);

    match &args.connect {
        Some(target) => node.connect(target).await?,
        None => {
            node.create_network().await?;
        }
    }
    tracing::info!(
        "Node running at {} with {} known peers",
        node.address().unwrap_or_default(),
        node.known_peers().len()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    node.shutdown();

    tracing::info!(
        "Node stopped after {} messages, ledger log length {}",
        node.message_count(),
        node.ledger().log_len()
    );
    Ok(())
}

async fn demo(config: NodeConfig, args: &DemoArgs) -> Result<()> {
    let options = DemoOptions {
        nodes: args.nodes,
        identities: args.identities,
        transactions: args.transactions,
        key_bits: args.key_bits,
        settle: Duration::from_secs(args.settle_secs),
    };
    let outcome = run_demo(config.network.to_network_config(), config.ledger, &options).await?;

    println!("{}", outcome.render());
    println!(
        "{} of {} transfers flooded; ledgers {}",
        outcome.flooded,
        args.transactions,
        if outcome.converged() { "agree" } else { "disagree" }
    );
    Ok(())
}
