//! # Cryptographic Primitives for TrustMesh
//!
//! Every signature and every digest in the protocol flows through here.
//! The menu is short on purpose:
//!
//! - **Ed25519** for node keys, handshake challenges, proposals and
//!   attestations.
//! - **BLAKE3** for node identities, proposal hashes and the domain-tagged
//!   digests that get signed.
//!
//! Everything is a thin wrapper around audited implementations. The only
//! protocol-specific logic is the domain separation in [`hash::DomainHasher`].

pub mod hash;
pub mod keys;
pub mod keystore;

pub use hash::{blake3_hash, DomainHasher};
pub use keys::{KeyError, NodeId, NodeKeypair, NodePublicKey, NodeSignature};
pub use keystore::{FileKeyStore, KeyProvider};
