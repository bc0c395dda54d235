//! Type errors

use thiserror::Error;

/// Errors from encoding or decoding transaction types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Canonical serialization failed
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Bytes do not decode to the expected type
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Signing the canonical bytes failed
    #[error(transparent)]
    Crypto(#[from] tally_crypto::CryptoError),
}

/// Result type for type operations
pub type TypesResult<T> = Result<T, TypesError>;
