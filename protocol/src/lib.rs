// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # TrustMesh Protocol: Core Library
//!
//! TrustMesh is a round-based, reputation-weighted proposal-selection
//! protocol. Time is cut into fixed-length rounds. In each round every node
//! proposes something, nodes gossip proposals and signed ratings over
//! authenticated point-to-point links, and each node independently settles
//! on one winner by tallying ratings weighted by the rater's reputation.
//!
//! ## Architecture
//!
//! - **config**: protocol constants. Change one and you have a new protocol.
//! - **crypto**: Ed25519 identities, BLAKE3 digests, the on-disk key store.
//! - **wire**: frame codec for the ten message types.
//! - **p2p**: handshake, connection pipelines, connection table, dialing.
//! - **directory**: known peers, their addresses and reputation.
//! - **consensus**: proposal store, scoring, gossip, round execution.
//! - **node**: glue between transport and consensus.
//! - **bootstrap**: one-shot rendezvous that introduces nodes to each other.
//!
//! ## Design Notes
//!
//! 1. Round state is ephemeral. Nothing about a round survives its end
//!    except the winner file.
//! 2. Every message touching consensus is signed, and every signature is
//!    bound to a domain tag and a round.
//! 3. A misbehaving peer costs us one connection, never the process.

pub mod bootstrap;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod directory;
pub mod node;
pub mod p2p;
pub mod wire;
