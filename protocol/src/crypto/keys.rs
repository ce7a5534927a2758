//! # Key Management
//!
//! Ed25519 keypairs, public keys, signatures and the node identity derived
//! from them.
//!
//! A node is addressed everywhere (connection table, attestations,
//! reputation lookups) by its [`NodeId`]: the BLAKE3 digest of its raw
//! public key. The public key itself only travels where a signature has to
//! be checked.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (ed25519-dalek does this for us).
//! - Key generation uses `OsRng`.
//! - Secret bytes are never logged; `Debug` prints the public half only.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

use super::hash::blake3_hash;
use crate::config::{HASH_OUTPUT_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not hex")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("key store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// NodeKeypair
// ---------------------------------------------------------------------------

/// A node's long-lived signing identity.
///
/// `NodeKeypair` deliberately does not implement `Serialize`. Persisting a
/// secret goes through [`super::keystore`] and nowhere else.
pub struct NodeKeypair {
    signing_key: SigningKey,
}

impl NodeKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Construct a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a hex-encoded seed. The decoded buffer is
    /// wiped before returning.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(
            hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?,
        );
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| KeyError::InvalidSecretKey)?,
        );
        Ok(Self::from_seed(&seed))
    }

    /// Hex-encoded seed, wrapped so the string is wiped when dropped.
    pub fn seed_hex(&self) -> Zeroizing<String> {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        Zeroizing::new(hex::encode(seed.as_slice()))
    }

    pub fn public_key(&self) -> NodePublicKey {
        NodePublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// The node identity of this keypair.
    pub fn node_id(&self) -> NodeId {
        self.public_key().node_id()
    }

    /// Sign a message. Callers in this crate always sign a 32-byte
    /// domain-tagged digest, never raw wire bytes.
    pub fn sign(&self, message: &[u8]) -> NodeSignature {
        NodeSignature {
            bytes: self.signing_key.sign(message).to_bytes(),
        }
    }
}

impl fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// NodePublicKey
// ---------------------------------------------------------------------------

/// The public half of a node identity, exactly as it travels on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePublicKey {
    bytes: [u8; PUBLIC_KEY_LENGTH],
}

impl NodePublicKey {
    /// Wrap raw bytes without validating the curve point. Validation happens
    /// lazily in [`verify`](Self::verify), which simply fails for bad points.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Parse and validate a public key.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; PUBLIC_KEY_LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.bytes
    }

    /// Content hash of the key: the canonical routing address of its owner.
    pub fn node_id(&self) -> NodeId {
        NodeId(blake3_hash(&self.bytes))
    }

    /// Verify a signature against this key. Malformed keys verify nothing.
    pub fn verify(&self, message: &[u8], signature: &NodeSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(&signature.bytes);
        verifying_key.verify(message, &sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for NodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePublicKey({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// NodeSignature
// ---------------------------------------------------------------------------

/// A raw 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NodeSignature {
    bytes: [u8; SIGNATURE_LENGTH],
}

impl NodeSignature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeSignature({}..)", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// BLAKE3 digest of a node's public key.
///
/// Ordering is plain byte order; it only matters for deterministic
/// iteration in logs and tests.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; HASH_OUTPUT_LENGTH]);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8; HASH_OUTPUT_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeId {
    /// Short form for logs: the first 8 bytes in hex.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}
