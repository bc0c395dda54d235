//! Ledger state and transaction application

use crate::error::{LedgerError, LedgerResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tally_crypto::{verify, PublicKey};
use tally_types::{SignedTransaction, Transaction};
use tracing::{debug, warn};

/// Acceptance rules beyond signature verification.
///
/// Every rule is off by default, which reproduces the permissive reference
/// behavior: duplicates are applied again, balances may go negative, and any
/// amount or recipient is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerPolicy {
    /// Reject a transaction whose id was already applied
    pub reject_duplicate_ids: bool,
    /// Reject zero and negative amounts
    pub require_positive_amount: bool,
    /// Reject transfers where `from == to`
    pub reject_self_transfer: bool,
    /// Reject transfers the sender cannot cover
    pub require_sufficient_balance: bool,
}

impl LedgerPolicy {
    /// Policy with every rule enabled
    pub fn strict() -> Self {
        Self {
            reject_duplicate_ids: true,
            require_positive_amount: true,
            reject_self_transfer: true,
            require_sufficient_balance: true,
        }
    }
}

/// Ledger log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// Transaction applied
    Applied {
        /// Transaction id from the verified payload
        id: String,
    },
    /// Transaction rejected, balances untouched
    Rejected {
        /// Why it was rejected
        reason: String,
    },
}

impl LogEntry {
    /// Whether the entry records an applied transaction
    pub fn is_applied(&self) -> bool {
        matches!(self, LogEntry::Applied { .. })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEntry::Applied { id } => write!(f, "{}", id),
            LogEntry::Rejected { reason } => write!(f, "rejected: {}", reason),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, i64>,
    log: Vec<LogEntry>,
    applied_ids: HashSet<String>,
}

impl LedgerState {
    fn balance(&self, identity: &str) -> i64 {
        self.accounts.get(identity).copied().unwrap_or(0)
    }

    fn reject(&mut self, err: &LedgerError) {
        self.log.push(LogEntry::Rejected {
            reason: err.to_string(),
        });
    }
}

/// Verify a signed transaction and return the trusted payload.
///
/// The public key is parsed from the claimed sender, the signature is checked
/// against `signature.msg`, and the payload is re-decoded from `msg`. The
/// decoded `from` must equal the identity whose key verified the signature.
pub fn verify_transaction(signed: &SignedTransaction) -> LedgerResult<Transaction> {
    let claimed = signed.claimed_sender();
    let public_key: PublicKey = claimed
        .parse()
        .map_err(|e: tally_crypto::CryptoError| LedgerError::InvalidIdentity(e.to_string()))?;

    if !verify(&signed.signature.signed_msg, &signed.signature.msg, &public_key) {
        return Err(LedgerError::VerificationFailed);
    }

    let trusted = signed
        .signed_payload()
        .map_err(|e| LedgerError::MalformedPayload(e.to_string()))?;
    if trusted.from != claimed {
        return Err(LedgerError::IdentityMismatch);
    }

    Ok(trusted)
}

/// Boolean form of [`verify_transaction`]
pub fn is_valid_transaction(signed: &SignedTransaction) -> bool {
    verify_transaction(signed).is_ok()
}

/// Account balances mutated only through verified transactions
pub struct Ledger {
    policy: LedgerPolicy,
    state: RwLock<LedgerState>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Create an empty ledger with the default policy
    pub fn new() -> Self {
        Self::with_policy(LedgerPolicy::default())
    }

    /// Create an empty ledger with the given policy
    pub fn with_policy(policy: LedgerPolicy) -> Self {
        Self {
            policy,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Active policy
    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    /// Apply a signed transaction.
    ///
    /// On failure a rejection marker is appended to the log and no balance
    /// changes. On success the id from the verified payload is appended.
    pub fn update(&self, signed: &SignedTransaction) -> LedgerResult<Transaction> {
        // Signature check runs before taking the lock
        let verified = verify_transaction(signed);

        let mut state = self.state.write();
        let tx = match verified {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Rejected transaction {}: {}", signed.tx.id, e);
                state.reject(&e);
                return Err(e);
            }
        };

        if let Err(e) = self.apply(&mut state, &tx) {
            warn!("Rejected transaction {}: {}", tx.id, e);
            state.reject(&e);
            return Err(e);
        }

        state.log.push(LogEntry::Applied { id: tx.id.clone() });
        state.applied_ids.insert(tx.id.clone());
        debug!("Applied {}", tx);
        Ok(tx)
    }

    fn apply(&self, state: &mut LedgerState, tx: &Transaction) -> LedgerResult<()> {
        if self.policy.reject_duplicate_ids && state.applied_ids.contains(&tx.id) {
            return Err(LedgerError::DuplicateTransaction(tx.id.clone()));
        }
        if self.policy.require_positive_amount && tx.amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(tx.amount));
        }
        if self.policy.reject_self_transfer && tx.from == tx.to {
            return Err(LedgerError::SelfTransfer);
        }

        let available = state.balance(&tx.from);
        if self.policy.require_sufficient_balance && available < tx.amount {
            return Err(LedgerError::InsufficientBalance {
                required: tx.amount,
                available,
            });
        }

        let debited = available
            .checked_sub(tx.amount)
            .ok_or(LedgerError::Overflow)?;
        if tx.from == tx.to {
            let credited = debited
                .checked_add(tx.amount)
                .ok_or(LedgerError::Overflow)?;
            state.accounts.insert(tx.from.clone(), credited);
            return Ok(());
        }

        let credited = state
            .balance(&tx.to)
            .checked_add(tx.amount)
            .ok_or(LedgerError::Overflow)?;
        state.accounts.insert(tx.from.clone(), debited);
        state.accounts.insert(tx.to.clone(), credited);
        Ok(())
    }

    /// Balance of an identity, 0 if never referenced
    pub fn balance(&self, identity: &str) -> i64 {
        self.state.read().balance(identity)
    }

    /// Snapshot of every referenced account
    pub fn accounts(&self) -> HashMap<String, i64> {
        self.state.read().accounts.clone()
    }

    /// Number of log entries
    pub fn log_len(&self) -> usize {
        self.state.read().log.len()
    }

    /// Log entry at `index`
    pub fn log_entry(&self, index: usize) -> LedgerResult<LogEntry> {
        let state = self.state.read();
        state
            .log
            .get(index)
            .cloned()
            .ok_or(LedgerError::IndexOutOfBounds {
                index,
                len: state.log.len(),
            })
    }

    /// Snapshot of the log
    pub fn log(&self) -> Vec<LogEntry> {
        self.state.read().log.clone()
    }
}
