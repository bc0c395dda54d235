//! # tally-network
//!
//! Self-organizing P2P overlay for Tally.
//!
//! This crate provides:
//! - Length-prefixed framing of the overlay `Message`
//! - Listener binding with bounded port retry, bounded dials and writes
//! - The join protocol: peer-list request, merge, announcement
//! - Best-effort flooding with bounded concurrent fan-out
//! - Dispatch of received transactions into the local `Ledger`
//!
//! ## Architecture
//!
//! ```text
//! +-------------------+
//! |       Node        |  <- Lifecycle, dispatch
//! +-------------------+
//!     |          |
//! +--------+ +--------+
//! |Members-| | Gossip |  <- Join state, peer set / fan-out sends
//! |  hip   | |        |
//! +--------+ +--------+
//!          |
//! +-------------------+
//! |    Connection     |  <- Framing, dial, listen, registry
//! +-------------------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use tally_network::{NetworkConfig, Node};
//!
//! let founder = Node::new(NetworkConfig::default());
//! let addr = founder.create_network().await?;
//!
//! let member = Node::new(NetworkConfig::default());
//! member.join(&addr).await?;
//!
//! member.flood_transaction(signed_tx).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec;
mod connection;
mod error;
mod gossip;
mod membership;
mod node;

pub use codec::{Message, MessageKind, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_LEN};
pub use connection::{
    bind_listener, dial, outbound_ip, read_frame, read_message, send, write_frame, write_message,
    ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionRegistry, Direction,
};
pub use error::{NetworkError, NetworkResult};
pub use gossip::{FloodReport, Gossip};
pub use membership::{Membership, MembershipState, PeerSet};
pub use node::{NetworkConfig, Node, DEFAULT_MAX_HISTORY};
