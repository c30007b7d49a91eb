//! Transaction types and signing.

use crate::block::current_timestamp;
use crate::crypto::{Address, CryptoError, PublicKey, Signature};
use crate::hash::{hash, Hash};
use crate::keystore::KeyStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("cannot sign transaction: {0}")]
    Signing(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("transaction hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch { stored: Hash, computed: Hash },

    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("transaction already embedded in block {0}")]
    AlreadyEmbedded(Hash),
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// Signature envelope: the signer's public key travels with the signature so
/// the sender can be verified from its address alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub public_key: PublicKey,
    pub signature: Signature,
}

/// A value transfer on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TransactionParts", into = "TransactionParts")]
pub struct Transaction {
    /// Sender's address (None for mining and genesis rewards).
    pub from: Option<Address>,
    /// Recipient's address.
    pub to: Address,
    /// Value to transfer.
    pub amount: Decimal,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Sender's signature over the content hash.
    pub signature: Option<TransactionSignature>,
    /// Hash of the block this transaction was sealed into.
    pub block_hash: Option<Hash>,
    /// Hash of the sender's previous transaction.
    pub origin_tx_hash: Option<Hash>,
    hash: Hash,
}

/// Raw field set of a transaction, as read back from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionParts {
    pub from: Option<Address>,
    pub to: Address,
    pub amount: Decimal,
    pub timestamp: u64,
    pub signature: Option<TransactionSignature>,
    pub block_hash: Option<Hash>,
    pub origin_tx_hash: Option<Hash>,
    pub hash: Hash,
}

/// Fields covered by the content hash.
#[derive(Serialize)]
struct TransactionContent<'a> {
    from: Option<&'a Address>,
    to: &'a Address,
    amount: String,
    origin_tx_hash: Option<&'a Hash>,
    timestamp: u64,
}

impl Transaction {
    /// Create a new unsigned transfer stamped with the current time.
    pub fn new(from: Address, to: Address, amount: Decimal, origin_tx_hash: Option<Hash>) -> Self {
        Self::with_timestamp(Some(from), to, amount, origin_tx_hash, current_timestamp())
    }

    /// Create a reward transaction (no sender, no lineage).
    pub fn reward(to: Address, amount: Decimal) -> Self {
        Self::with_timestamp(None, to, amount, None, current_timestamp())
    }

    /// Create a transaction with an explicit timestamp.
    pub fn with_timestamp(
        from: Option<Address>,
        to: Address,
        amount: Decimal,
        origin_tx_hash: Option<Hash>,
        timestamp: u64,
    ) -> Self {
        let mut tx = Self {
            from,
            to,
            amount,
            timestamp,
            signature: None,
            block_hash: None,
            origin_tx_hash,
            hash: Hash::ZERO,
        };
        tx.hash = tx.calculate_hash();
        tx
    }

    /// Rebuild a transaction from stored fields, rejecting tampered records.
    pub fn from_parts(parts: TransactionParts) -> Result<Self> {
        if parts.amount.is_sign_negative() {
            return Err(TransactionError::InvalidAmount(parts.amount));
        }
        let tx = Self {
            from: parts.from,
            to: parts.to,
            amount: parts.amount,
            timestamp: parts.timestamp,
            signature: parts.signature,
            block_hash: parts.block_hash,
            origin_tx_hash: parts.origin_tx_hash,
            hash: parts.hash,
        };
        tx.verify_transaction()?;
        Ok(tx)
    }

    /// The content hash fixed at construction.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Recompute the content hash from the five content fields.
    pub fn calculate_hash(&self) -> Hash {
        let content = TransactionContent {
            from: self.from.as_ref(),
            to: &self.to,
            amount: self.amount.normalize().to_string(),
            origin_tx_hash: self.origin_tx_hash.as_ref(),
            timestamp: self.timestamp,
        };
        let encoded = bincode::serialize(&content).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Sign the transaction with the sender's key from `keys`.
    pub fn sign(&mut self, keys: &dyn KeyStore) -> Result<()> {
        let from = self.from.ok_or_else(|| {
            TransactionError::Signing("reward transactions carry no signature".into())
        })?;
        let keypair = keys
            .load_keypair(&from)
            .ok_or_else(|| TransactionError::Signing(format!("no key found for {from}")))?;

        let digest = self.calculate_hash();
        self.signature = Some(TransactionSignature {
            public_key: keypair.public_key,
            signature: keypair.sign_hash(&digest),
        });
        Ok(())
    }

    /// Create a signed transaction.
    pub fn signed(mut self, keys: &dyn KeyStore) -> Result<Self> {
        self.sign(keys)?;
        Ok(self)
    }

    /// Check the sender's signature.
    ///
    /// Reward transactions are always valid. A missing or structurally
    /// malformed signature is an error; a signature that simply does not
    /// verify, or a content hash that no longer matches, yields `Ok(false)`.
    pub fn is_valid(&self) -> Result<bool> {
        let Some(from) = self.from else {
            return Ok(true);
        };
        let envelope = self
            .signature
            .ok_or_else(|| TransactionError::Signature("missing signature".into()))?;

        if envelope.public_key.to_address() != from {
            return Err(TransactionError::Signature(format!(
                "signing key does not belong to {from}"
            )));
        }

        let digest = self.calculate_hash();
        if digest != self.hash {
            return Ok(false);
        }

        match envelope.public_key.verify(digest.as_bytes(), &envelope.signature) {
            Ok(()) => Ok(true),
            Err(CryptoError::VerificationFailed) => Ok(false),
            Err(e) => Err(TransactionError::Signature(e.to_string())),
        }
    }

    /// Tamper check: the stored hash must equal the recomputed digest.
    pub fn verify_transaction(&self) -> Result<()> {
        let computed = self.calculate_hash();
        if computed != self.hash {
            return Err(TransactionError::HashMismatch {
                stored: self.hash,
                computed,
            });
        }
        Ok(())
    }

    /// Record the block this transaction was sealed into.
    pub fn embed(&mut self, block_hash: Hash) -> Result<()> {
        match self.block_hash {
            Some(existing) if existing != block_hash => {
                Err(TransactionError::AlreadyEmbedded(existing))
            }
            _ => {
                self.block_hash = Some(block_hash);
                Ok(())
            }
        }
    }

    /// Check if this is a reward (sender-less) transaction.
    pub fn is_reward(&self) -> bool {
        self.from.is_none()
    }

    /// Check if `address` sends or receives in this transaction.
    pub fn involves(&self, address: &Address) -> bool {
        self.from.as_ref() == Some(address) || self.to == *address
    }
}

impl TryFrom<TransactionParts> for Transaction {
    type Error = TransactionError;

    fn try_from(parts: TransactionParts) -> Result<Self> {
        Self::from_parts(parts)
    }
}

impl From<Transaction> for TransactionParts {
    fn from(tx: Transaction) -> Self {
        Self {
            from: tx.from,
            to: tx.to,
            amount: tx.amount,
            timestamp: tx.timestamp,
            signature: tx.signature,
            block_hash: tx.block_hash,
            origin_tx_hash: tx.origin_tx_hash,
            hash: tx.hash,
        }
    }
}
