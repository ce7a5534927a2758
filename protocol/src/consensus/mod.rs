//! # Consensus
//!
//! Round-based, reputation-weighted proposal selection.
//!
//! - [`types`]: proposals, attestations, scores.
//! - [`timing`]: the wall-clock round grid.
//! - [`store`]: round-scoped shared state.
//! - [`scoring`]: weighted tally of an attestation set.
//! - [`gossip`]: pushing a proposal to a peer sample.
//! - [`executor`]: one round, start to winner.
//! - [`scheduler`]: rounds back to back.
//! - [`output`]: where winners go.

pub mod executor;
pub mod gossip;
pub mod output;
pub mod payload;
pub mod scheduler;
pub mod scoring;
pub mod store;
pub mod timing;
pub mod types;

pub use executor::{select_winner, RoundConfig, RoundError, RoundExecutor, RoundOutcome};
pub use gossip::{Delivery, GossipError, GossipSender};
pub use output::{JsonWinnerSink, PersistError, WinnerRecord, WinnerSink};
pub use scheduler::{run_scheduler, RoundEvent};
pub use scoring::{weighted_score, ScoringError};
pub use store::{AttestationOutcome, InsertOutcome, ProposalStore, RoundGuard};
pub use types::{Attestation, Guarantee, ProposalBody, ProposalHash, Round, Score, SignatureError};
