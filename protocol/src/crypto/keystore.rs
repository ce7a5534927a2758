//! # Key Store
//!
//! Loads the node's signing seed from disk, creating it on first start.
//!
//! The seed lives in `<data-dir>/seed.key` as 64 hex characters, written
//! with owner-only permissions on Unix. Every intermediate buffer holding
//! seed material is wrapped in [`Zeroizing`] so it is wiped as soon as it
//! goes out of scope.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;
use zeroize::Zeroizing;

use super::keys::{KeyError, NodeKeypair};

/// File name of the seed inside the data directory.
pub const SEED_FILE: &str = "seed.key";

/// Source of the node's signing keypair.
pub trait KeyProvider: Send + Sync {
    /// Return the existing keypair or create and persist a new one.
    fn load_or_create(&self) -> Result<NodeKeypair, KeyError>;
}

/// Seed file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// Key store rooted at `data_dir/seed.key`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(SEED_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write a keypair's seed, replacing any existing file.
    pub fn store(&self, keypair: &NodeKeypair) -> Result<(), KeyError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let seed = keypair.seed_hex();
        let mut file = open_private(&self.path)?;
        file.write_all(seed.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Read the seed file. Fails if it does not exist.
    pub fn load(&self) -> Result<NodeKeypair, KeyError> {
        let contents = Zeroizing::new(fs::read_to_string(&self.path)?);
        NodeKeypair::from_hex(&contents)
    }
}

impl KeyProvider for FileKeyStore {
    fn load_or_create(&self) -> Result<NodeKeypair, KeyError> {
        if self.exists() {
            return self.load();
        }
        let keypair = NodeKeypair::generate();
        self.store(&keypair)?;
        info!(path = %self.path.display(), node_id = %keypair.node_id(), "generated new node key");
        Ok(keypair)
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
