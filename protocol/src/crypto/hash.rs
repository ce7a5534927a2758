//! # Hashing Utilities
//!
//! BLAKE3 is the only hash function in TrustMesh. It derives node
//! identities from public keys, content-addresses proposals, and produces
//! the digests that Ed25519 actually signs.
//!
//! ## Domain separation
//!
//! Signed material always starts with a 4-byte big-endian domain tag (see
//! [`crate::config`]). A handshake signature therefore can never be
//! mistaken for an attestation signature even if the remaining bytes
//! happen to line up.

/// Compute the BLAKE3 hash of the input data.
///
/// # Example
///
/// ```
/// use trustmesh_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"trustmesh");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Incremental hasher for domain-tagged digests.
///
/// All integers are fed big-endian, matching the wire format, so the digest
/// of a message can be recomputed from its decoded fields.
pub struct DomainHasher {
    inner: blake3::Hasher,
}

impl DomainHasher {
    /// Start a digest under the given domain tag.
    pub fn new(domain: u32) -> Self {
        let mut inner = blake3::Hasher::new();
        inner.update(&domain.to_be_bytes());
        Self { inner }
    }

    /// Start a digest with no domain tag. Used for content hashes that are
    /// never signed directly.
    pub fn untagged() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.inner.update(data);
        self
    }

    pub fn u32(self, value: u32) -> Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn u64(self, value: u64) -> Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn finish(self) -> [u8; 32] {
        *self.inner.finalize().as_bytes()
    }
}
