//! # tally-crypto
//!
//! Signature service for the Tally overlay.
//!
//! - SHA-256 hashing
//! - RSA key generation
//! - PKCS#1 v1.5 signing and verification over SHA-256
//! - Public key string form (`"<modulus>-<exponent>"`)

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod hash;
mod keys;
mod signature;

pub use error::{CryptoError, CryptoResult};
pub use hash::sha256;
pub use keys::{
    generate_keypair, generate_keypair_with_rng, PrivateKey, PublicKey, MIN_KEY_BITS,
    PUBLIC_EXPONENT,
};
pub use signature::{sign, verify};
