//! Ledger errors

use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Sender identity is not a public key
    #[error("invalid sender identity: {0}")]
    InvalidIdentity(String),

    /// Signature does not verify under the sender's key
    #[error("signature verification failed")]
    VerificationFailed,

    /// Signed payload is not a transaction
    #[error("malformed signed payload: {0}")]
    MalformedPayload(String),

    /// Signed payload names a different sender than the verifying key
    #[error("signed payload sender does not match the verifying identity")]
    IdentityMismatch,

    /// Transaction id was already applied
    #[error("duplicate transaction id: {0}")]
    DuplicateTransaction(String),

    /// Amount is zero or negative
    #[error("non-positive amount: {0}")]
    NonPositiveAmount(i64),

    /// Sender and recipient are the same identity
    #[error("self transfer")]
    SelfTransfer,

    /// Sender cannot cover the amount
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount requested
        required: i64,
        /// Balance held
        available: i64,
    },

    /// Balance arithmetic overflowed
    #[error("balance overflow")]
    Overflow,

    /// Log index out of range
    #[error("log index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Log length
        len: usize,
    },
}

impl LedgerError {
    /// Whether the error means the transaction failed authentication
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidIdentity(_)
                | LedgerError::VerificationFailed
                | LedgerError::MalformedPayload(_)
                | LedgerError::IdentityMismatch
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
