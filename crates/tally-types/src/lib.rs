//! # tally-types
//!
//! Core data types for the Tally overlay.
//!
//! This crate provides:
//! - `Transaction`: a balance transfer between two public-key identities
//! - `Signature`: the signed digest together with the exact bytes that were signed
//! - `SignedTransaction`: a transaction paired with its signature
//!
//! Only the payload recoverable from `Signature::msg` is authenticated. The
//! `tx` field of a `SignedTransaction` is a convenience copy and must not be
//! trusted until the signature has been verified and `msg` re-decoded.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod hex_bytes;
mod transaction;

pub use error::{TypesError, TypesResult};
pub use transaction::{Signature, SignedTransaction, Transaction};
