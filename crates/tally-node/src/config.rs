//! Configuration for tally-node
//!
//! An optional TOML file with `[network]` and `[ledger]` tables. Missing keys
//! fall back to the library defaults; CLI flags are applied on top.

use crate::cli::RunArgs;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use tally_ledger::LedgerPolicy;
use tally_network::{NetworkConfig, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_HISTORY};

/// Node configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Network settings
    pub network: NetworkSection,
    /// Ledger policy
    pub ledger: LedgerPolicy,
}

/// `[network]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Interface to listen on
    pub listen_host: IpAddr,
    /// Preferred port, 0 for any
    pub port: u16,
    /// IP advertised to peers
    pub advertise_ip: Option<IpAddr>,
    /// Bind attempts on port conflicts
    pub max_bind_attempts: usize,
    /// Join wait in milliseconds
    pub join_timeout_ms: u64,
    /// Per-send deadline in milliseconds
    pub send_timeout_ms: u64,
    /// Whole-flood deadline in milliseconds
    pub flood_deadline_ms: u64,
    /// Concurrent sends per flood
    pub max_concurrent_sends: usize,
    /// Largest accepted frame in bytes
    pub max_frame_size: usize,
    /// Received messages kept in memory
    pub max_history: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            advertise_ip: None,
            max_bind_attempts: 16,
            join_timeout_ms: 10_000,
            send_timeout_ms: 5_000,
            flood_deadline_ms: 10_000,
            max_concurrent_sends: 32,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl NetworkSection {
    /// Convert to the library configuration
    pub fn to_network_config(&self) -> NetworkConfig {
        NetworkConfig {
            listen_host: self.listen_host,
            port: self.port,
            advertise_ip: self.advertise_ip,
            max_bind_attempts: self.max_bind_attempts,
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            flood_deadline: Duration::from_millis(self.flood_deadline_ms),
            max_concurrent_sends: self.max_concurrent_sends,
            max_frame_size: self.max_frame_size,
            max_history: self.max_history,
        }
    }
}

impl NodeConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply `run` flags over file values
    pub fn apply_run_args(&mut self, args: &RunArgs) {
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(host) = args.listen_host {
            self.network.listen_host = host;
        }
        if let Some(ip) = args.advertise_ip {
            self.network.advertise_ip = Some(ip);
        }
    }
}
