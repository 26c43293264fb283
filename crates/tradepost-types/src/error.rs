//! Error types for the Tradepost settlement engine.
//!
//! All errors use the `TP_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors (bad input, rejected before any mutation)
//! - 2xx: State conflicts (stale view or lost race)
//! - 3xx: Authorization errors
//! - 4xx: Emergency stop
//! - 5xx: Escrow errors
//! - 6xx: External collaborator errors
//! - 9xx: General / internal errors
//!
//! Every variant maps onto one [`ErrorClass`], which tells the caller
//! whether retrying can help.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{Address, ListingId, ListingStatus, TokenId};

/// How a caller should react to a [`MarketError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad input. Retry with corrected input.
    Validation,
    /// Race or stale view. Refresh state and retry.
    StateConflict,
    /// Wrong caller identity. Not retryable as-is.
    Authorization,
    /// Emergency stop engaged. Retry after the owner lifts it.
    SystemPaused,
    /// Ledger invariant broken. Fatal, never expected.
    InvariantViolation,
    /// A collaborator (token registry, disk) failed.
    External,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "VALIDATION"),
            Self::StateConflict => write!(f, "STATE_CONFLICT"),
            Self::Authorization => write!(f, "AUTHORIZATION"),
            Self::SystemPaused => write!(f, "SYSTEM_PAUSED"),
            Self::InvariantViolation => write!(f, "INVARIANT_VIOLATION"),
            Self::External => write!(f, "EXTERNAL"),
        }
    }
}

/// Central error enum for all Tradepost operations.
#[derive(Debug, Error)]
pub enum MarketError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// Price (or starting price) must be strictly positive.
    #[error("TP_ERR_100: Invalid price: {price}")]
    InvalidPrice { price: Decimal },

    /// Auction duration outside the configured bounds.
    #[error("TP_ERR_101: Invalid auction duration: {secs}s (allowed {min_secs}s..={max_secs}s)")]
    InvalidDuration {
        secs: i64,
        min_secs: i64,
        max_secs: i64,
    },

    /// Payment does not equal the listing price.
    #[error("TP_ERR_102: Wrong amount: expected {expected}, got {got}")]
    WrongAmount { expected: Decimal, got: Decimal },

    /// Malformed commitment digest.
    #[error("TP_ERR_103: Invalid commitment: {reason}")]
    InvalidCommitment { reason: String },

    /// Fee rate above the hard ceiling.
    #[error("TP_ERR_104: Invalid fee rate: {bps} bps (max {max_bps})")]
    InvalidFeeRate { bps: u32, max_bps: u32 },

    /// No listing with this id.
    #[error("TP_ERR_105: Listing not found: {0}")]
    ListingNotFound(ListingId),

    /// Address could not be parsed or is unusable.
    #[error("TP_ERR_106: Invalid address: {reason}")]
    InvalidAddress { reason: String },

    /// An amount, or a total it feeds into, exceeds what a `Decimal` holds.
    #[error("TP_ERR_107: Amount overflow: {what}")]
    AmountOverflow { what: String },

    // =================================================================
    // State Conflicts (2xx)
    // =================================================================
    /// An Active listing already references this token.
    #[error("TP_ERR_200: Token already listed: {0}")]
    AlreadyListed(TokenId),

    /// Listing is not Active.
    #[error("TP_ERR_201: Listing {id} is not active (status {status})")]
    ListingNotActive { id: ListingId, status: ListingStatus },

    /// Auction is not Active or has reached its end time.
    #[error("TP_ERR_202: Auction not active: {0}")]
    AuctionNotActive(ListingId),

    /// Bid does not strictly exceed the current highest bid.
    #[error("TP_ERR_203: Bid too low: bid {bid}, highest {highest}")]
    BidTooLow { bid: Decimal, highest: Decimal },

    /// Auction has not reached its end time yet.
    #[error("TP_ERR_204: Auction still active until {ends_at}")]
    AuctionStillActive { ends_at: DateTime<Utc> },

    /// Auction was already finalized.
    #[error("TP_ERR_205: Auction already finalized: {0}")]
    AlreadyFinalized(ListingId),

    /// Seller tried to cancel an auction that has a bid.
    #[error("TP_ERR_206: Bids exist on auction {0}")]
    BidsExist(ListingId),

    /// Auction-only operation invoked on a fixed-price listing.
    #[error("TP_ERR_207: Listing {0} is not an auction")]
    NotAnAuction(ListingId),

    /// Fixed-price-only operation invoked on an auction.
    #[error("TP_ERR_208: Listing {0} is not a fixed-price listing")]
    NotFixedPrice(ListingId),

    /// A live commitment already exists for this committer.
    #[error("TP_ERR_209: Commitment already exists for {0}")]
    AlreadyCommitted(Address),

    /// No commitment exists for this committer.
    #[error("TP_ERR_210: No commitment for {0}")]
    NoCommitment(Address),

    /// Revealed pre-image does not hash to the stored commitment.
    #[error("TP_ERR_211: Commitment hash mismatch")]
    HashMismatch,

    /// Reveal attempted before the wait window elapsed.
    #[error("TP_ERR_212: Reveal too early, allowed from {reveal_at}")]
    TooEarly { reveal_at: DateTime<Utc> },

    /// Reveal attempted after the grace period.
    #[error("TP_ERR_213: Commitment expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    /// Invalidation attempted while the commitment can still be revealed.
    #[error("TP_ERR_214: Commitment still live until {expires_at}")]
    CommitmentNotExpired { expires_at: DateTime<Utc> },

    /// Withdraw called with a zero balance.
    #[error("TP_ERR_215: Nothing to withdraw for {0}")]
    NothingToWithdraw(Address),

    // =================================================================
    // Authorization Errors (3xx)
    // =================================================================
    /// Caller is not the system owner.
    #[error("TP_ERR_300: Caller {0} is not the owner")]
    NotOwner(Address),

    /// Caller is not the seller of the listing.
    #[error("TP_ERR_301: Caller {caller} is not the seller of {id}")]
    NotSeller { id: ListingId, caller: Address },

    /// Seller attempted to bid on their own auction.
    #[error("TP_ERR_302: Seller cannot bid on own auction {0}")]
    SelfBid(ListingId),

    /// Seller attempted to buy their own listing.
    #[error("TP_ERR_303: Seller cannot buy own listing {0}")]
    SelfPurchase(ListingId),

    /// Marketplace lacks transfer approval for the token.
    #[error("TP_ERR_304: Marketplace not approved for {0}")]
    NotApproved(TokenId),

    /// Caller does not own the token being listed.
    #[error("TP_ERR_305: {caller} does not own {token}")]
    NotTokenOwner { token: TokenId, caller: Address },

    // =================================================================
    // Emergency Stop (4xx)
    // =================================================================
    /// All mutating calls are rejected while the emergency stop is set.
    #[error("TP_ERR_400: System paused")]
    SystemPaused,

    // =================================================================
    // Escrow Errors (5xx)
    // =================================================================
    /// Release requested more than is locked against the auction.
    #[error("TP_ERR_500: Insufficient locked funds on {auction}: need {needed}, locked {locked}")]
    InsufficientLocked {
        auction: ListingId,
        needed: Decimal,
        locked: Decimal,
    },

    // =================================================================
    // External Collaborator Errors (6xx)
    // =================================================================
    /// The token registry refused the transfer.
    #[error("TP_ERR_600: Token transfer failed for {token}: {reason}")]
    TokenTransferFailed { token: TokenId, reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Ledger or escrow invariant violated. Critical safety alert.
    #[error("TP_ERR_900: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// Serialization / deserialization error.
    #[error("TP_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, bad values).
    #[error("TP_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (snapshot file, script file).
    #[error("TP_ERR_903: I/O error: {0}")]
    Io(String),
}

impl MarketError {
    /// Which taxonomy bucket this error belongs to.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidPrice { .. }
            | Self::InvalidDuration { .. }
            | Self::WrongAmount { .. }
            | Self::InvalidCommitment { .. }
            | Self::InvalidFeeRate { .. }
            | Self::ListingNotFound(_)
            | Self::InvalidAddress { .. }
            | Self::AmountOverflow { .. }
            | Self::Configuration(_) => ErrorClass::Validation,

            Self::AlreadyListed(_)
            | Self::ListingNotActive { .. }
            | Self::AuctionNotActive(_)
            | Self::BidTooLow { .. }
            | Self::AuctionStillActive { .. }
            | Self::AlreadyFinalized(_)
            | Self::BidsExist(_)
            | Self::NotAnAuction(_)
            | Self::NotFixedPrice(_)
            | Self::AlreadyCommitted(_)
            | Self::NoCommitment(_)
            | Self::HashMismatch
            | Self::TooEarly { .. }
            | Self::Expired { .. }
            | Self::CommitmentNotExpired { .. }
            | Self::NothingToWithdraw(_) => ErrorClass::StateConflict,

            Self::NotOwner(_)
            | Self::NotSeller { .. }
            | Self::SelfBid(_)
            | Self::SelfPurchase(_)
            | Self::NotApproved(_)
            | Self::NotTokenOwner { .. } => ErrorClass::Authorization,

            Self::SystemPaused => ErrorClass::SystemPaused,

            Self::InsufficientLocked { .. } | Self::InvariantViolation { .. } => {
                ErrorClass::InvariantViolation
            }

            Self::TokenTransferFailed { .. } | Self::Serialization(_) | Self::Io(_) => {
                ErrorClass::External
            }
        }
    }

    /// Whether the same caller can reasonably retry (after fixing input,
    /// refreshing state, or waiting for the pause to lift).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.class(),
            ErrorClass::Authorization | ErrorClass::InvariantViolation
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, MarketError>;

impl From<std::io::Error> for MarketError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = MarketError::ListingNotFound(ListingId(9));
        let msg = format!("{err}");
        assert!(msg.starts_with("TP_ERR_105"), "Got: {msg}");
        assert!(msg.contains("listing:9"));
    }

    #[test]
    fn bid_too_low_display() {
        let err = MarketError::BidTooLow {
            bid: Decimal::new(2, 2),
            highest: Decimal::new(3, 2),
        };
        let msg = format!("{err}");
        assert!(msg.contains("TP_ERR_203"));
        assert!(msg.contains("0.02"));
        assert!(msg.contains("0.03"));
    }

    #[test]
    fn listing_not_active_shows_status() {
        let err = MarketError::ListingNotActive {
            id: ListingId(1),
            status: ListingStatus::Sold,
        };
        assert!(format!("{err}").contains("SOLD"));
    }

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(
            MarketError::InvalidPrice {
                price: Decimal::ZERO
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(
            MarketError::AmountOverflow {
                what: "bid".into()
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(MarketError::HashMismatch.class(), ErrorClass::StateConflict);
        assert_eq!(
            MarketError::SelfBid(ListingId(1)).class(),
            ErrorClass::Authorization
        );
        assert_eq!(MarketError::SystemPaused.class(), ErrorClass::SystemPaused);
        assert_eq!(
            MarketError::InvariantViolation { reason: "x".into() }.class(),
            ErrorClass::InvariantViolation
        );
    }

    #[test]
    fn retryability() {
        assert!(MarketError::SystemPaused.is_retryable());
        assert!(MarketError::AuctionNotActive(ListingId(1)).is_retryable());
        assert!(!MarketError::NotOwner(Address::ZERO).is_retryable());
        assert!(
            !MarketError::InsufficientLocked {
                auction: ListingId(1),
                needed: Decimal::ONE,
                locked: Decimal::ZERO,
            }
            .is_retryable()
        );
    }

    #[test]
    fn all_errors_have_tp_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(MarketError::SystemPaused),
            Box::new(MarketError::HashMismatch),
            Box::new(MarketError::AlreadyListed(TokenId(7))),
            Box::new(MarketError::Io("disk".into())),
            Box::new(MarketError::InvariantViolation {
                reason: "a".into(),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("TP_ERR_"),
                "Error missing TP_ERR_ prefix: {msg}"
            );
        }
    }
}
