//! JSON command scripts.
//!
//! A script names the marketplace owner and operator, an optional start
//! time for the manual clock, and a list of steps. Each step is one call
//! against the engine (or the in-memory registry, or the clock) and may
//! declare the error code it expects:
//!
//! ```json
//! { "op": "bid", "bidder": "0x0a..", "listing": 1, "amount": "0.02" }
//! { "op": "bid", "bidder": "0x0a..", "listing": 1, "amount": "0.01",
//!   "expect_error": "TP_ERR_203" }
//! ```
//!
//! Amounts are decimal strings. Salts are 64 hex digits.

use std::path::Path;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use tradepost_types::{Address, CommitmentHash, ListingId, Salt, TokenId};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub owner: Address,
    /// Address the registry must approve for listed tokens.
    pub operator: Address,
    /// Manual clock start; defaults to the wall clock at load time.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let script: Self = serde_json::from_str(json).context("malformed script")?;
        if script.steps.is_empty() {
            bail!("script has no steps");
        }
        Ok(script)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    /// `TP_ERR_` code (or any prefix of the error message) the step must fail with.
    #[serde(default)]
    pub expect_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Action {
    // Registry and clock
    Mint {
        token: TokenId,
        to: Address,
    },
    /// Approve the script's operator for one token.
    Approve {
        owner: Address,
        token: TokenId,
    },
    /// Approve the script's operator for every token of `owner`.
    ApproveAll {
        owner: Address,
        #[serde(default = "yes")]
        approved: bool,
    },
    Advance {
        secs: i64,
    },

    // Trading
    CreateListing {
        seller: Address,
        token: TokenId,
        price: Decimal,
    },
    CreateAuction {
        seller: Address,
        token: TokenId,
        starting_price: Decimal,
        duration_secs: i64,
    },
    Bid {
        bidder: Address,
        listing: ListingId,
        amount: Decimal,
    },
    Buy {
        buyer: Address,
        listing: ListingId,
        payment: Decimal,
    },
    Finalize {
        listing: ListingId,
    },
    Cancel {
        caller: Address,
        listing: ListingId,
    },

    // Commit-reveal
    /// Commit to a pre-image; the digest is computed here, client side.
    Commit {
        committer: Address,
        token: TokenId,
        price: Decimal,
        #[serde(deserialize_with = "salt_from_hex")]
        salt: Salt,
    },
    /// Commit to a digest computed elsewhere.
    CommitHash {
        committer: Address,
        #[serde(deserialize_with = "hash_from_hex")]
        hash: CommitmentHash,
    },
    Reveal {
        committer: Address,
        token: TokenId,
        price: Decimal,
        #[serde(deserialize_with = "salt_from_hex")]
        salt: Salt,
    },
    Invalidate {
        committer: Address,
    },

    // Funds
    Withdraw {
        caller: Address,
    },
    WithdrawFees {
        caller: Address,
    },

    // Admin
    SetEmergencyStop {
        caller: Address,
        stopped: bool,
    },
    SetFeeRate {
        caller: Address,
        fee_bps: u32,
    },
    TransferOwnership {
        caller: Address,
        new_owner: Address,
    },

    // Checks
    /// Fails the step unless `address` has exactly `amount` withdrawable.
    ExpectBalance {
        address: Address,
        amount: Decimal,
    },
    /// Fails the step unless the protocol-fee balance is exactly `amount`.
    ExpectFees {
        amount: Decimal,
    },
    ExpectOwner {
        token: TokenId,
        owner: Address,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mint { .. } => "mint",
            Self::Approve { .. } => "approve",
            Self::ApproveAll { .. } => "approve_all",
            Self::Advance { .. } => "advance",
            Self::CreateListing { .. } => "create_listing",
            Self::CreateAuction { .. } => "create_auction",
            Self::Bid { .. } => "bid",
            Self::Buy { .. } => "buy",
            Self::Finalize { .. } => "finalize",
            Self::Cancel { .. } => "cancel",
            Self::Commit { .. } => "commit",
            Self::CommitHash { .. } => "commit_hash",
            Self::Reveal { .. } => "reveal",
            Self::Invalidate { .. } => "invalidate",
            Self::Withdraw { .. } => "withdraw",
            Self::WithdrawFees { .. } => "withdraw_fees",
            Self::SetEmergencyStop { .. } => "set_emergency_stop",
            Self::SetFeeRate { .. } => "set_fee_rate",
            Self::TransferOwnership { .. } => "transfer_ownership",
            Self::ExpectBalance { .. } => "expect_balance",
            Self::ExpectFees { .. } => "expect_fees",
            Self::ExpectOwner { .. } => "expect_owner",
        }
    }
}

fn yes() -> bool {
    true
}

/// Parse 64 hex digits (optional `0x`) into a salt.
pub fn parse_salt(s: &str) -> anyhow::Result<Salt> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(digits).with_context(|| format!("salt {s} is not hex"))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| anyhow::anyhow!("salt must be 32 bytes, got {}", v.len()))
}

fn salt_from_hex<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Salt, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_salt(&s).map_err(serde::de::Error::custom)
}

fn hash_from_hex<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<CommitmentHash, D::Error> {
    let s = String::deserialize(deserializer)?;
    CommitmentHash::from_hex(&s).map_err(serde::de::Error::custom)
}
