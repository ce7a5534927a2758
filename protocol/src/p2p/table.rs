//! # Connection Table
//!
//! Maps authenticated peer identities to the handle of their live
//! connection. One instance per node, shared by every connection (which
//! registers itself after the handshake and deregisters on teardown) and by
//! the dialer (which reuses existing links instead of opening new ones).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::IoHandle;
use crate::crypto::NodeId;

#[derive(Debug, Default)]
pub struct ConnectionTable {
    inner: RwLock<HashMap<NodeId, Arc<IoHandle>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly authenticated connection.
    ///
    /// A previous entry for the same peer is marked stale and returned; it
    /// keeps running until its own pipelines end.
    pub fn register(&self, peer: NodeId, handle: Arc<IoHandle>) -> Option<Arc<IoHandle>> {
        let previous = self.inner.write().insert(peer, handle);
        if let Some(old) = &previous {
            debug!(peer = %peer, "already connected, previous link marked stale");
            old.mark_stale();
        }
        previous
    }

    /// Live handle for `peer`, skipping one whose close signal already fired.
    pub fn get(&self, peer: &NodeId) -> Option<Arc<IoHandle>> {
        self.inner
            .read()
            .get(peer)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Remove `peer`'s entry if it still points at `handle`. A connection
    /// tearing down after being superseded leaves the newer entry alone.
    pub fn remove(&self, peer: &NodeId, handle: &Arc<IoHandle>) -> bool {
        let mut inner = self.inner.write();
        match inner.get(peer) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                inner.remove(peer);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.inner.read().keys().copied().collect()
    }
}
