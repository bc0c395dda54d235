//! Overlay membership
//!
//! Tracks the node's lifecycle state, its advertised address and the set of
//! peer addresses it knows about. The known-peer set only ever grows, and
//! once bound it always contains the node's own address.
//!
//! A join parks a one-shot sender here; the first non-empty peer list that
//! arrives on any connection completes it.

use crate::error::{NetworkError, NetworkResult};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::oneshot;

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipState {
    /// No listener yet
    Unbound,
    /// Listening, not part of an overlay
    Listening,
    /// Waiting for a peer list
    Joining,
    /// Part of an overlay
    Joined,
}

impl fmt::Display for MembershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MembershipState::Unbound => "unbound",
            MembershipState::Listening => "listening",
            MembershipState::Joining => "joining",
            MembershipState::Joined => "joined",
        };
        f.write_str(name)
    }
}

/// Grow-only set of peer addresses
#[derive(Debug, Default)]
pub struct PeerSet {
    inner: RwLock<BTreeSet<String>>,
}

impl PeerSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address, returning whether it was new
    pub fn insert(&self, addr: impl Into<String>) -> bool {
        self.inner.write().insert(addr.into())
    }

    /// Union `addrs` into the set, returning how many were new
    pub fn merge<I>(&self, addrs: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut inner = self.inner.write();
        let mut added = 0;
        for addr in addrs {
            if inner.insert(addr) {
                added += 1;
            }
        }
        added
    }

    /// Whether the address is known
    pub fn contains(&self, addr: &str) -> bool {
        self.inner.read().contains(addr)
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.inner.read().clone()
    }

    /// Every known address except `own`
    pub fn others(&self, own: &str) -> Vec<String> {
        self.inner
            .read()
            .iter()
            .filter(|a| a.as_str() != own)
            .cloned()
            .collect()
    }

    /// Number of known addresses
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

struct PendingJoin {
    reply: Option<oneshot::Sender<BTreeSet<String>>>,
    resume: MembershipState,
}

struct Lifecycle {
    state: MembershipState,
    address: Option<String>,
    pending: Option<PendingJoin>,
}

/// Membership state of one node
pub struct Membership {
    lifecycle: Mutex<Lifecycle>,
    peers: PeerSet,
}

impl Default for Membership {
    fn default() -> Self {
        Self::new()
    }
}

impl Membership {
    /// Create membership in the `Unbound` state
    pub fn new() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle {
                state: MembershipState::Unbound,
                address: None,
                pending: None,
            }),
            peers: PeerSet::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> MembershipState {
        self.lifecycle.lock().state
    }

    /// Advertised address, once bound
    pub fn address(&self) -> Option<String> {
        self.lifecycle.lock().address.clone()
    }

    /// Advertised address, or an error while unbound
    pub fn require_address(&self) -> NetworkResult<String> {
        self.address()
            .ok_or_else(|| NetworkError::InvalidState("node is not listening".into()))
    }

    /// Known peers
    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Record the advertised address: `Unbound` -> `Listening`
    pub fn bind(&self, address: String) -> NetworkResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != MembershipState::Unbound {
            return Err(NetworkError::InvalidState(format!(
                "cannot bind while {}",
                lifecycle.state
            )));
        }
        self.peers.insert(address.clone());
        lifecycle.address = Some(address);
        lifecycle.state = MembershipState::Listening;
        Ok(())
    }

    /// Become a founding member: `Listening` -> `Joined`
    pub fn found(&self) -> NetworkResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            MembershipState::Listening | MembershipState::Joined => {
                lifecycle.state = MembershipState::Joined;
                Ok(())
            }
            state => Err(NetworkError::InvalidState(format!(
                "cannot found an overlay while {}",
                state
            ))),
        }
    }

    /// Start waiting for a peer list
    ///
    /// Allowed from `Listening` or `Joined`. The returned receiver fires with
    /// the first non-empty peer list passed to [`Membership::complete_join`].
    pub fn begin_join(&self) -> NetworkResult<oneshot::Receiver<BTreeSet<String>>> {
        let mut lifecycle = self.lifecycle.lock();
        let resume = match lifecycle.state {
            MembershipState::Listening | MembershipState::Joined => lifecycle.state,
            MembershipState::Joining => return Err(NetworkError::JoinInProgress),
            MembershipState::Unbound => {
                return Err(NetworkError::InvalidState(
                    "cannot join before listening".into(),
                ))
            }
        };
        let (tx, rx) = oneshot::channel();
        lifecycle.pending = Some(PendingJoin {
            reply: Some(tx),
            resume,
        });
        lifecycle.state = MembershipState::Joining;
        Ok(rx)
    }

    /// Hand a received peer list to a waiting join
    ///
    /// Returns whether a join was waiting.
    pub fn complete_join(&self, peers: BTreeSet<String>) -> bool {
        let reply = self
            .lifecycle
            .lock()
            .pending
            .as_mut()
            .and_then(|pending| pending.reply.take());
        match reply {
            Some(tx) => tx.send(peers).is_ok(),
            None => false,
        }
    }

    /// Join finished: `Joining` -> `Joined`
    pub fn finish_join(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.pending = None;
        lifecycle.state = MembershipState::Joined;
    }

    /// Join failed: return to the state the join started from
    pub fn abort_join(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(pending) = lifecycle.pending.take() {
            lifecycle.state = pending.resume;
        }
    }
}

impl fmt::Debug for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("Membership")
            .field("state", &lifecycle.state)
            .field("address", &lifecycle.address)
            .field("peers", &self.peers.len())
            .finish()
    }
}
