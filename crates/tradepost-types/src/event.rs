//! Market events emitted on every committed transition.
//!
//! Events form an append-only audit trail that the embedding service can
//! forward to indexers or UI notifications. Rejected calls emit nothing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, CommitmentHash, EventId, ListingId, TokenId};

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    ListingCreated {
        listing_id: ListingId,
        token_id: TokenId,
        seller: Address,
        price: Decimal,
    },
    AuctionCreated {
        listing_id: ListingId,
        token_id: TokenId,
        seller: Address,
        starting_price: Decimal,
        end_time: DateTime<Utc>,
    },
    BidPlaced {
        listing_id: ListingId,
        bidder: Address,
        amount: Decimal,
        /// Bidder whose funds became withdrawable, if any.
        outbid: Option<Address>,
    },
    ListingSold {
        listing_id: ListingId,
        buyer: Address,
        price: Decimal,
        fee: Decimal,
    },
    AuctionFinalized {
        listing_id: ListingId,
        /// `None` when the auction ended without bids or without a sale.
        winner: Option<Address>,
        amount: Decimal,
        fee: Decimal,
        /// High bidder whose bid became withdrawable because the seller
        /// could no longer deliver the token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refunded: Option<Address>,
    },
    ListingCancelled {
        listing_id: ListingId,
    },
    CommitmentSubmitted {
        committer: Address,
        hash: CommitmentHash,
    },
    CommitmentRevealed {
        committer: Address,
        listing_id: ListingId,
    },
    CommitmentInvalidated {
        committer: Address,
    },
    EmergencyStopChanged {
        stopped: bool,
    },
    FeeRateChanged {
        fee_bps: u32,
    },
    OwnershipTransferred {
        previous: Address,
        owner: Address,
    },
    FundsWithdrawn {
        to: Address,
        amount: Decimal,
    },
    FeesWithdrawn {
        to: Address,
        amount: Decimal,
    },
}

impl MarketEvent {
    /// Stable event name for logs and notifications.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListingCreated { .. } => "LISTING_CREATED",
            Self::AuctionCreated { .. } => "AUCTION_CREATED",
            Self::BidPlaced { .. } => "BID_PLACED",
            Self::ListingSold { .. } => "LISTING_SOLD",
            Self::AuctionFinalized { .. } => "AUCTION_FINALIZED",
            Self::ListingCancelled { .. } => "LISTING_CANCELLED",
            Self::CommitmentSubmitted { .. } => "COMMITMENT_SUBMITTED",
            Self::CommitmentRevealed { .. } => "COMMITMENT_REVEALED",
            Self::CommitmentInvalidated { .. } => "COMMITMENT_INVALIDATED",
            Self::EmergencyStopChanged { .. } => "EMERGENCY_STOP_CHANGED",
            Self::FeeRateChanged { .. } => "FEE_RATE_CHANGED",
            Self::OwnershipTransferred { .. } => "OWNERSHIP_TRANSFERRED",
            Self::FundsWithdrawn { .. } => "FUNDS_WITHDRAWN",
            Self::FeesWithdrawn { .. } => "FEES_WITHDRAWN",
        }
    }

    /// The listing this event concerns, if any.
    #[must_use]
    pub fn listing_id(&self) -> Option<ListingId> {
        match self {
            Self::ListingCreated { listing_id, .. }
            | Self::AuctionCreated { listing_id, .. }
            | Self::BidPlaced { listing_id, .. }
            | Self::ListingSold { listing_id, .. }
            | Self::AuctionFinalized { listing_id, .. }
            | Self::ListingCancelled { listing_id }
            | Self::CommitmentRevealed { listing_id, .. } => Some(*listing_id),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An event stamped with identity, order, and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    /// Position in the engine's event stream, starting at 0.
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub event: MarketEvent,
}
