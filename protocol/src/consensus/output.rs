//! # Winner Output
//!
//! The only externally visible result of a round: one JSON document per
//! round, written to `<dir>/<round>.json`.
//!
//! ```json
//! {
//!   "proposer_pub_key": "<hex>",
//!   "payload": "alpha-bravo-...",
//!   "timestamp": "2026-01-01T00:00:00Z",
//!   "proposer_sig": "<hex>"
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::types::{ProposalBody, Round};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error writing winner: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timestamp out of range: {0}")]
    Timestamp(u64),
}

/// Destination for committed round winners.
pub trait WinnerSink: Send + Sync {
    fn persist(&self, round: Round, winner: &ProposalBody) -> Result<(), PersistError>;
}

/// Serialized form of a winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub proposer_pub_key: String,
    pub payload: String,
    /// RFC 3339, second precision, UTC.
    pub timestamp: String,
    pub proposer_sig: String,
}

impl WinnerRecord {
    pub fn from_body(body: &ProposalBody) -> Result<Self, PersistError> {
        let timestamp = Utc
            .timestamp_millis_opt(body.timestamp as i64)
            .single()
            .ok_or(PersistError::Timestamp(body.timestamp))?
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        Ok(Self {
            proposer_pub_key: body.proposer.to_hex(),
            payload: String::from_utf8_lossy(&body.payload).into_owned(),
            timestamp,
            proposer_sig: body.signature.to_hex(),
        })
    }
}

/// Writes each winner as pretty-printed JSON into a directory.
#[derive(Debug, Clone)]
pub struct JsonWinnerSink {
    dir: PathBuf,
}

impl JsonWinnerSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, round: Round) -> PathBuf {
        self.dir.join(format!("{}.json", round))
    }
}

impl WinnerSink for JsonWinnerSink {
    fn persist(&self, round: Round, winner: &ProposalBody) -> Result<(), PersistError> {
        let record = WinnerRecord::from_body(winner)?;
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(round);
        fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        debug!(round, path = %path.display(), "winner written");
        Ok(())
    }
}
