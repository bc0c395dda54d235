//! Overlay message codec
//!
//! A frame is a 4-byte big-endian length followed by a JSON payload. The
//! payload is a flat record carrying the sender plus at most one purpose:
//! a join flag, a peer-list-request flag, a non-empty peer list, or a
//! signed transaction. Records that set more than one purpose are rejected.

use crate::error::{NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tally_types::SignedTransaction;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on a single frame payload
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Overlay message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Announce the sender to the overlay
    JoinRequest {
        /// Sender's listening address
        sender: String,
    },
    /// Ask the receiver for its known-peer set
    PeerListRequest {
        /// Address the reply is dialed back to
        sender: String,
    },
    /// Known-peer set of the sender
    PeerListResponse {
        /// Sender's listening address
        sender: String,
        /// Addresses known to the sender
        peers: BTreeSet<String>,
    },
    /// Signed transaction to apply to the ledger
    Transaction {
        /// Sender's listening address
        sender: String,
        /// The transaction
        signed_tx: SignedTransaction,
    },
}

/// Discriminant of a [`Message`], used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Join announcement
    JoinRequest,
    /// Peer list request
    PeerListRequest,
    /// Peer list response
    PeerListResponse,
    /// Transaction
    Transaction,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::JoinRequest => "join-request",
            MessageKind::PeerListRequest => "peer-list-request",
            MessageKind::PeerListResponse => "peer-list-response",
            MessageKind::Transaction => "transaction",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    sender: String,
    #[serde(default)]
    join_request: bool,
    #[serde(default)]
    peer_list_request: bool,
    #[serde(default)]
    peers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction: Option<SignedTransaction>,
}

impl Message {
    /// Sender address carried by the message
    pub fn sender(&self) -> &str {
        match self {
            Message::JoinRequest { sender }
            | Message::PeerListRequest { sender }
            | Message::PeerListResponse { sender, .. }
            | Message::Transaction { sender, .. } => sender,
        }
    }

    /// Message kind
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::JoinRequest { .. } => MessageKind::JoinRequest,
            Message::PeerListRequest { .. } => MessageKind::PeerListRequest,
            Message::PeerListResponse { .. } => MessageKind::PeerListResponse,
            Message::Transaction { .. } => MessageKind::Transaction,
        }
    }

    /// Serialize to a JSON payload without the length prefix
    pub fn to_payload(&self) -> NetworkResult<Vec<u8>> {
        let wire = match self {
            Message::JoinRequest { sender } => WireMessage {
                sender: sender.clone(),
                join_request: true,
                ..Default::default()
            },
            Message::PeerListRequest { sender } => WireMessage {
                sender: sender.clone(),
                peer_list_request: true,
                ..Default::default()
            },
            Message::PeerListResponse { sender, peers } => WireMessage {
                sender: sender.clone(),
                peers: peers.iter().cloned().collect(),
                ..Default::default()
            },
            Message::Transaction { sender, signed_tx } => WireMessage {
                sender: sender.clone(),
                transaction: Some(signed_tx.clone()),
                ..Default::default()
            },
        };
        serde_json::to_vec(&wire).map_err(|e| NetworkError::InvalidMessage(e.to_string()))
    }

    /// Parse a JSON payload without the length prefix
    pub fn from_payload(payload: &[u8]) -> NetworkResult<Self> {
        let wire: WireMessage =
            serde_json::from_slice(payload).map_err(|e| NetworkError::Decode(e.to_string()))?;

        if wire.sender.is_empty() {
            return Err(NetworkError::InvalidMessage("missing sender".into()));
        }

        let purposes = [
            wire.join_request,
            wire.peer_list_request,
            !wire.peers.is_empty(),
            wire.transaction.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if purposes > 1 {
            return Err(NetworkError::InvalidMessage(
                "message sets more than one purpose".into(),
            ));
        }

        let sender = wire.sender;
        let msg = if wire.join_request {
            Message::JoinRequest { sender }
        } else if wire.peer_list_request {
            Message::PeerListRequest { sender }
        } else if let Some(signed_tx) = wire.transaction {
            Message::Transaction { sender, signed_tx }
        } else {
            // An empty peer list is still a response; the receiver decides
            // what to do with it.
            Message::PeerListResponse {
                sender,
                peers: wire.peers.into_iter().collect(),
            }
        };
        Ok(msg)
    }

    /// Encode message to a frame
    /// Format: [length: 4 bytes][payload: N bytes]
    pub fn encode(&self) -> NetworkResult<Bytes> {
        let payload = self.to_payload()?;
        let len = u32::try_from(payload.len()).map_err(|_| NetworkError::FrameTooLarge {
            len: payload.len(),
            max: u32::MAX as usize,
        })?;
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
        buf.put_u32(len);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode message from a complete frame
    pub fn decode(mut data: Bytes) -> NetworkResult<Self> {
        if data.len() < LENGTH_PREFIX_LEN {
            return Err(NetworkError::Decode("truncated length prefix".into()));
        }
        let len = data.get_u32() as usize;
        if data.len() != len {
            return Err(NetworkError::Decode(format!(
                "length prefix says {} bytes, frame carries {}",
                len,
                data.len()
            )));
        }
        Self::from_payload(&data)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.kind(), self.sender())
    }
}
