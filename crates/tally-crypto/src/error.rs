//! Cryptographic errors

use thiserror::Error;

/// Cryptographic operation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Public key could not be parsed or is degenerate
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Requested modulus is below the supported minimum
    #[error("key size {bits} bits is below the minimum of {min} bits")]
    KeyTooSmall {
        /// Requested modulus size
        bits: u64,
        /// Minimum modulus size
        min: u64,
    },

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Signing failed
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
