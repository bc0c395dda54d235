//! CLI argument parsing for tally-node

use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Tally overlay node
#[derive(Parser, Debug, Clone)]
#[command(name = "tally")]
#[command(about = "Peer-to-peer overlay with a replicated signed-transfer ledger")]
#[command(version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one node until Ctrl+C
    Run(RunArgs),
    /// Start several in-process nodes, flood random transfers, print balances
    Demo(DemoArgs),
}

/// Arguments of `run`
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Preferred listen port (0 picks one)
    #[arg(long)]
    pub port: Option<u16>,

    /// Interface to listen on
    #[arg(long)]
    pub listen_host: Option<IpAddr>,

    /// IP advertised to peers
    #[arg(long)]
    pub advertise_ip: Option<IpAddr>,

    /// Peer to join; a new overlay is created when absent or unreachable
    #[arg(long)]
    pub connect: Option<String>,
}

/// Arguments of `demo`
#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Number of nodes
    #[arg(long, default_value_t = 5)]
    pub nodes: usize,

    /// Number of key pairs transfers are drawn between
    #[arg(long, default_value_t = 3)]
    pub identities: usize,

    /// Number of transfers to flood
    #[arg(long, default_value_t = 10)]
    pub transactions: usize,

    /// RSA modulus size
    #[arg(long, default_value_t = 512)]
    pub key_bits: u64,

    /// Seconds to wait for every ledger to catch up
    #[arg(long, default_value_t = 5)]
    pub settle_secs: u64,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
