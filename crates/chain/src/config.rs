//! Ledger configuration.

use crate::ledger::{LedgerError, Result};
use provchain_core::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for block production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Pending transactions drained into each block.
    pub transaction_threshold: usize,
    /// Amount paid to the miner per block.
    pub mining_reward: Decimal,
    /// Leading zero hex characters required of block hashes.
    pub difficulty: u32,
    /// Amount issued to the genesis address.
    pub genesis_issuance: Decimal,
    /// How long to wait for the mining lock, in milliseconds (0 = single try).
    pub lock_timeout_ms: u64,
    /// Recipient of block rewards; no reward is paid when unset.
    pub miner_address: Option<Address>,
    /// Recipient of the genesis issuance. Required to initialize a new store.
    pub genesis_address: Option<Address>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            transaction_threshold: 2,
            mining_reward: Decimal::from(100),
            difficulty: 2,
            genesis_issuance: Decimal::from(1_000_000),
            lock_timeout_ms: 0,
            miner_address: None,
            genesis_address: None,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Reject settings the ledger cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.transaction_threshold == 0 {
            return Err(LedgerError::Validation(
                "transaction threshold must be at least 1".into(),
            ));
        }
        if self.mining_reward.is_sign_negative() {
            return Err(LedgerError::Validation(format!(
                "mining reward cannot be negative: {}",
                self.mining_reward
            )));
        }
        if self.genesis_issuance.is_sign_negative() {
            return Err(LedgerError::Validation(format!(
                "genesis issuance cannot be negative: {}",
                self.genesis_issuance
            )));
        }
        if self.difficulty > 64 {
            return Err(LedgerError::Validation(format!(
                "difficulty {} exceeds the 64 hex characters of a hash",
                self.difficulty
            )));
        }
        Ok(())
    }
}
