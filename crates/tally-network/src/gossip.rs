//! Gossip flooding
//!
//! A flood delivers one message to every target over a fresh short-lived
//! connection. Sends run concurrently, capped at `max_concurrent_sends`,
//! and the whole flood is bounded by `flood_deadline`. Receivers never
//! re-flood what they get; each message reaches only the originator's
//! known peers.

use crate::codec::{Message, MessageKind};
use crate::connection::{self, ConnectionRegistry, Direction};
use crate::error::{NetworkError, NetworkResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Outcome of a flood
#[derive(Debug, Default)]
pub struct FloodReport {
    /// Targets the message was written to
    pub delivered: Vec<String>,
    /// Targets that could not be reached, with the reason
    pub failed: Vec<(String, NetworkError)>,
}

impl FloodReport {
    /// Number of targets attempted
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// Whether every target was reached
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends messages to peer addresses
#[derive(Debug, Clone)]
pub struct Gossip {
    connections: Arc<ConnectionRegistry>,
    send_timeout: Duration,
    flood_deadline: Duration,
    max_concurrent_sends: usize,
}

impl Gossip {
    /// Create a sender
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        send_timeout: Duration,
        flood_deadline: Duration,
        max_concurrent_sends: usize,
    ) -> Self {
        Self {
            connections,
            send_timeout,
            flood_deadline,
            max_concurrent_sends: max_concurrent_sends.max(1),
        }
    }

    /// Deliver one message to one address
    pub async fn send_to(&self, addr: &str, msg: &Message) -> NetworkResult<()> {
        let frame = msg.encode()?;
        self.deliver(addr, &frame).await
    }

    /// Deliver `msg` to every target
    ///
    /// Failures are logged and reported, never propagated. Targets still
    /// pending when the flood deadline passes are reported as timed out.
    pub async fn flood(&self, targets: Vec<String>, msg: &Message) -> FloodReport {
        if targets.is_empty() {
            return FloodReport::default();
        }

        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Cannot encode {} for flooding: {}", msg.kind(), e);
                let reason = e.to_string();
                return FloodReport {
                    delivered: Vec::new(),
                    failed: targets
                        .into_iter()
                        .map(|t| (t, NetworkError::InvalidMessage(reason.clone())))
                        .collect(),
                };
            }
        };

        debug!("Flooding {} to {} peers", msg.kind(), targets.len());
        let gossip = self.clone();
        self.fan_out(targets, msg.kind(), move |addr| {
            let gossip = gossip.clone();
            let frame = frame.clone();
            async move { gossip.deliver(&addr, &frame).await }
        })
        .await
    }

    /// Run `send` for every target, at most `max_concurrent_sends` at once,
    /// until all finish or `flood_deadline` passes
    async fn fan_out<F, Fut>(&self, targets: Vec<String>, kind: MessageKind, send: F) -> FloodReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = NetworkResult<()>> + Send + 'static,
    {
        let mut report = FloodReport::default();
        let deadline = Instant::now() + self.flood_deadline;
        let mut queue = targets.into_iter();
        let mut in_flight: HashMap<task::Id, String> = HashMap::new();
        let mut tasks = JoinSet::new();

        for addr in queue.by_ref().take(self.max_concurrent_sends) {
            let handle = tasks.spawn(send(addr.clone()));
            in_flight.insert(handle.id(), addr);
        }

        loop {
            let joined = match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    break;
                }
            };

            match joined {
                Ok((id, result)) => {
                    if let Some(addr) = in_flight.remove(&id) {
                        match result {
                            Ok(()) => report.delivered.push(addr),
                            Err(e) => {
                                warn!("Failed to deliver {} to {}: {}", kind, addr, e);
                                report.failed.push((addr, e));
                            }
                        }
                    }
                }
                Err(e) => {
                    if let Some(addr) = in_flight.remove(&e.id()) {
                        error!("Delivery of {} to {} failed: {}", kind, addr, e);
                        report.failed.push((addr, NetworkError::TaskFailed(e.to_string())));
                    }
                }
            }

            if let Some(addr) = queue.next() {
                let handle = tasks.spawn(send(addr.clone()));
                in_flight.insert(handle.id(), addr);
            }
        }

        for addr in in_flight.into_values().chain(queue) {
            warn!("Flood deadline passed before {} was reached", addr);
            report.failed.push((
                addr,
                NetworkError::Timeout(format!("flood deadline {:?}", self.flood_deadline)),
            ));
        }
        report
    }

    /// Dial, write one frame, close. Bounded by `send_timeout` overall.
    async fn deliver(&self, addr: &str, frame: &[u8]) -> NetworkResult<()> {
        let attempt = async {
            let mut stream = connection::dial(addr, self.send_timeout).await?;
            let _guard = self
                .connections
                .register(stream.peer_addr()?, Direction::Outbound);
            connection::write_frame(&mut stream, frame).await?;
            stream.shutdown().await?;
            Ok::<(), NetworkError>(())
        };
        match tokio::time::timeout(self.send_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(format!(
                "send to {} exceeded {:?}",
                addr, self.send_timeout
            ))),
        }
    }
}
