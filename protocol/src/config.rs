//! # Protocol Configuration & Constants
//!
//! Every magic number in TrustMesh lives here. Wire codes, domain tags,
//! timeouts and tally thresholds are all part of the protocol: two nodes
//! that disagree on any of them will not talk to each other for long.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version string, reported by `trustmesh-node version`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Domain Tags
// ---------------------------------------------------------------------------
//
// Each signed context mixes its own 4-byte tag into the hashed material so a
// signature produced for one purpose can never be replayed for another.

/// Handshake challenge (Response and Confirm signatures).
pub const HANDSHAKE_DOMAIN: u32 = 0x7D4B_2507;

/// Heartbeat body. Not signed, but a peer sending anything else is broken.
pub const HEARTBEAT_DOMAIN: u32 = 0xB02F_55D8;

/// Attestation (rating) signatures.
pub const ATTESTATION_DOMAIN: u32 = 0x4878_3BC2;

/// Guarantee signatures. Reserved: guarantees are carried on the wire but
/// not verified yet.
pub const GUARANTEE_DOMAIN: u32 = 0x6DB7_008D;

/// Proposer signatures over `(round, proposal hash)`.
pub const PROPOSER_DOMAIN: u32 = 0x3A17_4310;

// ---------------------------------------------------------------------------
// Inquiry Sentinels
// ---------------------------------------------------------------------------

/// Inquiry reply: the peer already holds the proposal body.
pub const INQUIRY_ALREADY_HAVE: u32 = 0x0D7E_F654;

/// Inquiry reply: the peer wants the proposal body.
pub const INQUIRY_NEED: u32 = 0xB059_C403;

/// Inquiry reply: the peer is not running that round.
pub const INQUIRY_REFUSE: u32 = 0x62DB_C647;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// BLAKE3 output length, also the node identity and proposal hash length.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Handshake nonce length.
pub const NONCE_LENGTH: usize = 32;

/// Correlation id carried by inquiries and their replies.
pub const TRANSACTION_ID_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Framing Limits
// ---------------------------------------------------------------------------

/// Largest variable-length body we are willing to buffer. A peer declaring
/// more than this is dropped before a single body byte is read.
pub const MAX_FRAME_BODY: usize = 16 * 1024 * 1024;

/// Maximum tolerated difference between a handshake timestamp and the local
/// clock, in seconds.
pub const MAX_CLOCK_SKEW_SECS: u64 = 3_600;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Deadline applied to every single read or write on a peer stream.
pub const IO_DEADLINE: Duration = Duration::from_secs(10);

/// Deadline for each of the three handshake steps.
pub const HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat period on every established connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long the heartbeat task waits for the handshake before giving up on
/// the connection.
pub const HEARTBEAT_READY_WAIT: Duration = Duration::from_secs(5);

/// The write pipeline terminates after this long without outbound work.
pub const WRITE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for placing a message on a peer's outbound queue.
pub const QUEUE_SEND_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for placing a bundle on a peer's outbound queue.
pub const BUNDLE_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a gossip task waits for the correlated inquiry reply.
pub const INQUIRY_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a dialer waits for a fresh connection to report its peer.
pub const DIAL_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP connect timeout for outbound dials.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Queue Capacities
// ---------------------------------------------------------------------------

/// Per-connection outbound message queue.
pub const WRITE_QUEUE_CAPACITY: usize = 256;

/// Per-round notification queue feeding the round executor.
pub const NOTIFY_QUEUE_CAPACITY: usize = 128;

// ---------------------------------------------------------------------------
// Consensus Parameters
// ---------------------------------------------------------------------------

/// A proposal is rebroadcast once its tally has risen by at least this much
/// since the last broadcast.
pub const SCORE_BROADCAST_THRESHOLD: u32 = 10;

/// Number of peers sampled for every broadcast (`H`).
pub const GOSSIP_FANOUT: usize = 100;

/// Reputation range for peers in the directory.
pub const MIN_REPUTATION: u32 = 0;
pub const MAX_REPUTATION: u32 = 10_000;

/// Reputation given to a peer on first sight, and to the local node in its
/// own directory.
pub const INITIAL_REPUTATION: u32 = 5_000;

/// Mean and deviation of the randomized reputation refresh.
pub const REPUTATION_MEAN: f64 = 5_000.0;
pub const REPUTATION_STD_DEV: f64 = 1_500.0;

/// Scores above this are logged but still counted.
pub const MAX_SCORE: u32 = 10_000;

/// Score a node attaches to its own proposal at round start.
pub const SELF_SCORE: u32 = 5_000;

/// Number of words in a generated payload.
pub const PAYLOAD_WORDS: usize = 32;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default P2P listening port.
pub const DEFAULT_P2P_PORT: u16 = 9740;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

/// Default round length.
pub const DEFAULT_ROUND_INTERVAL: Duration = Duration::from_secs(10);

/// How long the bootstrap node collects reports before replying.
pub const DEFAULT_BOOTSTRAP_WAIT: Duration = Duration::from_secs(30);

/// Peers the bootstrap node hands to each reporter.
pub const DEFAULT_BOOTSTRAP_DENSITY: usize = 8;

/// Sub-directory of the data dir receiving `<round>.json` winner files.
pub const WINNER_DIR: &str = "block";
