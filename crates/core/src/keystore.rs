//! Key management capability injected into signing.

use crate::crypto::{Address, CryptoError, Keypair};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Source of signing keys, passed explicitly wherever a transaction is signed.
pub trait KeyStore: Send + Sync {
    /// Generate and retain a new keypair, returning its address.
    fn generate_keypair(&self) -> Result<Address, CryptoError>;

    /// Load the keypair controlling `address`, if this store holds it.
    fn load_keypair(&self, address: &Address) -> Option<Keypair>;

    /// All addresses this store holds keys for.
    fn addresses(&self) -> Vec<Address>;
}

/// In-memory key store.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<Address, Keypair>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an existing keypair.
    pub fn insert(&self, keypair: Keypair) -> Address {
        let address = keypair.address();
        self.keys.write().insert(address, keypair);
        address
    }
}

impl KeyStore for MemoryKeyStore {
    fn generate_keypair(&self) -> Result<Address, CryptoError> {
        Ok(self.insert(Keypair::generate()))
    }

    fn load_keypair(&self, address: &Address) -> Option<Keypair> {
        self.keys.read().get(address).cloned()
    }

    fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<_> = self.keys.read().keys().copied().collect();
        addresses.sort();
        addresses
    }
}
