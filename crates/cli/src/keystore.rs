//! Wallet files on disk.
//!
//! Each wallet is one JSON file under `<data_dir>/keys/` holding the address
//! and the hex-encoded key pair. Keys are stored unencrypted.

use anyhow::{bail, Context, Result};
use provchain_core::{Address, CryptoError, KeyStore, Keypair};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize)]
struct KeyFile {
    name: String,
    address: Address,
    public_key: String,
    private_key: String,
}

impl KeyFile {
    fn new(name: &str, keypair: &Keypair) -> Self {
        Self {
            name: name.to_string(),
            address: keypair.address(),
            public_key: hex::encode(keypair.public_key.as_bytes()),
            private_key: hex::encode(keypair.private_key()),
        }
    }

    fn keypair(&self) -> Result<Keypair> {
        let bytes = hex::decode(&self.private_key).context("Invalid private key hex")?;
        let private_key: [u8; 32] = bytes.as_slice().try_into().with_context(|| {
            format!(
                "Invalid private key length: expected 32 bytes, got {}",
                bytes.len()
            )
        })?;

        let keypair = Keypair::from_private_key(&private_key);
        if keypair.address() != self.address {
            bail!(
                "Key file for {} holds a key belonging to {}",
                self.address,
                keypair.address()
            );
        }
        Ok(keypair)
    }
}

/// Key store backed by a directory of JSON wallet files.
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("keys"),
        }
    }

    /// Generate a keypair and save it as `<name>.json`.
    ///
    /// Without a name the file is named after the address.
    pub fn create(&self, name: Option<&str>) -> Result<(String, Address)> {
        let keypair = Keypair::generate();
        let address = keypair.address();
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("account_{}", &address.to_hex()[2..10]),
        };

        let path = self.dir.join(format!("{}.json", name));
        if path.exists() {
            bail!("A wallet named '{}' already exists", name);
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create key directory: {:?}", self.dir))?;
        let contents = serde_json::to_string_pretty(&KeyFile::new(&name, &keypair))?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write key file: {}", path.display()))?;

        tracing::debug!(name = name.as_str(), %address, "wallet created");
        Ok((name, address))
    }

    /// All wallets as `(name, address)`, sorted by name.
    pub fn wallets(&self) -> Result<Vec<(String, Address)>> {
        let mut wallets: Vec<_> = self
            .read_all()?
            .into_iter()
            .map(|file| (file.name, file.address))
            .collect();
        wallets.sort();
        Ok(wallets)
    }

    /// Resolve a wallet name or a hex address.
    pub fn resolve(&self, name_or_address: &str) -> Result<Address> {
        if let Ok(address) = Address::from_hex(name_or_address) {
            return Ok(address);
        }
        self.read_all()?
            .into_iter()
            .find(|file| file.name == name_or_address)
            .map(|file| file.address)
            .with_context(|| {
                format!(
                    "'{}' is neither an address nor a wallet name",
                    name_or_address
                )
            })
    }

    fn read_all(&self) -> Result<Vec<KeyFile>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            let file: KeyFile = serde_json::from_str(&contents)
                .with_context(|| format!("Malformed key file: {}", path.display()))?;
            files.push(file);
        }
        Ok(files)
    }

    fn find(&self, address: &Address) -> Result<Option<Keypair>> {
        match self.read_all()?.iter().find(|file| file.address == *address) {
            Some(file) => file.keypair().map(Some),
            None => Ok(None),
        }
    }
}

impl KeyStore for FileKeyStore {
    fn generate_keypair(&self) -> Result<Address, CryptoError> {
        self.create(None)
            .map(|(_, address)| address)
            .map_err(|e| CryptoError::KeyStorage(format!("{:#}", e)))
    }

    fn load_keypair(&self, address: &Address) -> Option<Keypair> {
        match self.find(address) {
            Ok(keypair) => keypair,
            Err(e) => {
                tracing::warn!(%address, error = %e, "failed to load wallet");
                None
            }
        }
    }

    fn addresses(&self) -> Vec<Address> {
        match self.wallets() {
            Ok(wallets) => wallets.into_iter().map(|(_, address)| address).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list wallets");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path());

        let (name, address) = store.create(Some("alice")).unwrap();
        assert_eq!(name, "alice");
        let keypair = store.load_keypair(&address).unwrap();
        assert_eq!(keypair.address(), address);

        assert_eq!(store.resolve("alice").unwrap(), address);
        assert_eq!(store.resolve(&address.to_hex()).unwrap(), address);
        assert!(store.resolve("bob").is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path());
        store.create(Some("alice")).unwrap();
        assert!(store.create(Some("alice")).is_err());
    }

    #[test]
    fn test_generate_through_trait() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path());
        let keys: &dyn KeyStore = &store;

        let a = keys.generate_keypair().unwrap();
        let b = keys.generate_keypair().unwrap();
        let mut expected = vec![a, b];
        expected.sort();
        let mut listed = keys.addresses();
        listed.sort();
        assert_eq!(listed, expected);
        assert!(keys.load_keypair(&Address::ZERO).is_none());
    }

    #[test]
    fn test_mismatched_key_file_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path());
        let (_, address) = store.create(Some("alice")).unwrap();

        let path = dir.path().join("keys").join("alice.json");
        let mut file: KeyFile = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        file.private_key = hex::encode(Keypair::generate().private_key());
        fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        assert!(store.load_keypair(&address).is_none());
    }
}
