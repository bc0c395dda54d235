//! Transactions and their signatures

use crate::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tally_crypto::{sign, PrivateKey};

/// A balance transfer between two public-key identities
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque, producer-chosen identifier
    pub id: String,
    /// Sender identity (public key string form)
    pub from: String,
    /// Recipient identity (public key string form)
    pub to: String,
    /// Amount moved from `from` to `to`
    pub amount: i64,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            amount,
        }
    }

    /// Canonical serialization, the exact bytes that get signed
    pub fn signing_bytes(&self) -> TypesResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TypesError::Serialization(e.to_string()))
    }

    /// Decode a transaction from its canonical serialization
    pub fn from_signing_bytes(bytes: &[u8]) -> TypesResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| TypesError::Deserialization(e.to_string()))
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx {} ({} units)", self.id, self.amount)
    }
}

/// Signature over a message, carrying the message itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Signed digest
    #[serde(with = "crate::hex_bytes")]
    pub signed_msg: Vec<u8>,
    /// Bytes that were signed
    #[serde(with = "crate::hex_bytes")]
    pub msg: Vec<u8>,
}

impl Signature {
    /// Create a signature from its parts
    pub fn new(signed_msg: Vec<u8>, msg: Vec<u8>) -> Self {
        Self { signed_msg, msg }
    }
}

/// Transaction paired with a signature binding it to its originating identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Convenience copy, not authenticated
    pub tx: Transaction,
    /// Signature over the canonical serialization of the transaction
    pub signature: Signature,
}

impl SignedTransaction {
    /// Sign a transaction with the sender's private key
    pub fn sign(tx: Transaction, private_key: &PrivateKey) -> TypesResult<Self> {
        let msg = tx.signing_bytes()?;
        let signed_msg = sign(&msg, private_key)?;
        Ok(Self {
            tx,
            signature: Signature::new(signed_msg, msg),
        })
    }

    /// Identity claimed by the convenience copy
    pub fn claimed_sender(&self) -> &str {
        &self.tx.from
    }

    /// Decode the signed payload. Trust it only after verification.
    pub fn signed_payload(&self) -> TypesResult<Transaction> {
        Transaction::from_signing_bytes(&self.signature.msg)
    }
}
