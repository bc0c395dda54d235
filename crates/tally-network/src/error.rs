//! Network error types

use tally_ledger::LedgerError;
use thiserror::Error;

/// Network errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener could not be bound for a reason other than a port conflict
    #[error("bind failed: {0}")]
    Bind(String),

    /// Every bind attempt hit a port conflict
    #[error("no free port after {attempts} attempts")]
    PortInUse {
        /// Number of ports tried
        attempts: usize,
    },

    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Dial or write deadline elapsed
    #[error("timeout: {0}")]
    Timeout(String),

    /// No peer list arrived before the join deadline
    #[error("join timed out waiting for peer list from {0}")]
    JoinTimeout(String),

    /// Another join is already waiting for its peer list
    #[error("a join is already in progress")]
    JoinInProgress,

    /// Operation not allowed in the current lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Frame payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Frame length exceeds the configured maximum
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Message log index out of range
    #[error("message index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Log length
        len: usize,
    },

    /// Message history entry was evicted to stay within `max_history`
    #[error("message {index} was evicted (oldest retained is {oldest})")]
    MessageEvicted {
        /// Requested index
        index: usize,
        /// Index of the oldest retained message
        oldest: usize,
    },

    /// Local ledger refused a transaction
    #[error("transaction rejected: {0}")]
    Ledger(#[from] LedgerError),

    /// Channel closed
    #[error("channel closed")]
    ChannelClosed,

    /// A spawned send panicked or was cancelled
    #[error("delivery task failed: {0}")]
    TaskFailed(String),
}

impl NetworkError {
    /// Whether the error came from dialing or writing to a peer
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            NetworkError::Io(_) | NetworkError::ConnectionFailed(_) | NetworkError::Timeout(_)
        )
    }
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;
