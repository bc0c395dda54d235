//! # tally-ledger
//!
//! Per-node replica of account balances.
//!
//! This crate provides:
//! - Signature verification bound to the sender identity
//! - Balance transfers applied only from the verified, re-decoded payload
//! - An append-only log of applied transaction ids and failure markers
//! - Opt-in policies for duplicate ids, non-positive amounts, self transfers
//!   and overdrafts
//!
//! ## Usage
//!
//! ```ignore
//! use tally_ledger::Ledger;
//!
//! let ledger = Ledger::new();
//! ledger.update(&signed_tx)?;
//! let balance = ledger.balance(&signed_tx.tx.to);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{is_valid_transaction, verify_transaction, Ledger, LedgerPolicy, LogEntry};
