//! JSON snapshots of the full engine state.
//!
//! A snapshot holds everything needed to resume with identical behavior:
//! listings and the id counter, escrow balances and locks, fee balance and
//! flow totals, commitments, the system flag and config. The token registry
//! and clock are collaborators and are supplied again on restore.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradepost_escrow::EscrowSnapshot;
use tradepost_types::{Address, Commitment, MarketConfig, Result, SystemFlag};

use crate::ledger::LedgerSnapshot;

/// Bumped on any incompatible change to [`MarketSnapshot`].
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub format_version: u32,
    pub taken_at: DateTime<Utc>,
    pub operator: Address,
    pub flag: SystemFlag,
    pub config: MarketConfig,
    pub ledger: LedgerSnapshot,
    pub escrow: EscrowSnapshot,
    pub commitments: Vec<Commitment>,
    pub next_event_sequence: u64,
}

impl MarketSnapshot {
    /// # Errors
    /// `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    /// `Serialization` for malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write to `path`, replacing any existing file.
    ///
    /// # Errors
    /// `Io` or `Serialization`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        // Write-then-rename so a crash never leaves a truncated snapshot.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        tracing::info!(path = %path.display(), "Snapshot saved");
        Ok(())
    }

    /// # Errors
    /// `Io` or `Serialization`.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
