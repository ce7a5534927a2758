//! sled-backed peer directory.
//!
//! | Tree    | Key              | Value              |
//! |---------|------------------|--------------------|
//! | `peers` | node id (32B)    | `bincode(PeerRecord)` |

use std::path::Path;

use sled::{Db, Tree};

use super::{DirectoryError, DirectoryResult, PeerDirectory, PeerRecord};
use crate::crypto::NodeId;

#[derive(Debug, Clone)]
pub struct SledPeerDirectory {
    db: Db,
    peers: Tree,
}

impl SledPeerDirectory {
    /// Open or create a directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DirectoryResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory directory removed on drop. For tests.
    pub fn open_temporary() -> DirectoryResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> DirectoryResult<Self> {
        let peers = db.open_tree("peers")?;
        Ok(Self { db, peers })
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> DirectoryResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> DirectoryResult<PeerRecord> {
    bincode::deserialize(bytes).map_err(|e| DirectoryError::Serialization(e.to_string()))
}

impl PeerDirectory for SledPeerDirectory {
    fn upsert(&self, record: PeerRecord) -> DirectoryResult<()> {
        let bytes =
            bincode::serialize(&record).map_err(|e| DirectoryError::Serialization(e.to_string()))?;
        self.peers.insert(record.node_id.as_bytes(), bytes)?;
        Ok(())
    }

    fn get(&self, node: &NodeId) -> DirectoryResult<Option<PeerRecord>> {
        match self.peers.get(node.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn peers(&self) -> DirectoryResult<Vec<PeerRecord>> {
        self.peers
            .iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    fn len(&self) -> DirectoryResult<usize> {
        Ok(self.peers.len())
    }
}
