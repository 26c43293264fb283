//! Listing and auction records.
//!
//! A [`Listing`] is the unit the ledger stores. Fixed-price listings and
//! auctions share one record type; the auction-only fields live in
//! [`AuctionState`] inside [`ListingKind::Auction`].
//!
//! ## State Machine
//!
//! ```text
//!   ACTIVE ──buy (fixed price)────▶ SOLD
//!   ACTIVE ──finalize (auction)───▶ FINALIZED
//!   ACTIVE ──cancel (seller)──────▶ CANCELLED
//! ```
//!
//! Terminal states are immutable.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, ListingId, TokenId};

/// Lifecycle status of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListingStatus {
    Active,
    Sold,
    Cancelled,
    Finalized,
}

impl ListingStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Can a listing of the given kind move from `self` to `target`?
    ///
    /// Fixed price: `Active → Sold | Cancelled`.
    /// Auction: `Active → Finalized | Cancelled`.
    #[must_use]
    pub fn can_transition_to(&self, target: Self, is_auction: bool) -> bool {
        match (self, target) {
            (Self::Active, Self::Cancelled) => true,
            (Self::Active, Self::Sold) => !is_auction,
            (Self::Active, Self::Finalized) => is_auction,
            _ => false,
        }
    }
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Sold => write!(f, "SOLD"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Finalized => write!(f, "FINALIZED"),
        }
    }
}

/// Auction-only state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionState {
    /// Bids are accepted strictly before this instant.
    pub end_time: DateTime<Utc>,
    /// Starts at the starting price; only ever increases.
    pub highest_bid: Decimal,
    /// `None` until the first accepted bid.
    pub highest_bidder: Option<Address>,
}

impl AuctionState {
    #[must_use]
    pub fn new(starting_price: Decimal, end_time: DateTime<Utc>) -> Self {
        Self {
            end_time,
            highest_bid: starting_price,
            highest_bidder: None,
        }
    }

    #[must_use]
    pub fn has_bids(&self) -> bool {
        self.highest_bidder.is_some()
    }

    /// Bidding is open strictly before `end_time`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now < self.end_time
    }
}

/// Fixed price or auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingKind {
    FixedPrice,
    Auction(AuctionState),
}

impl ListingKind {
    #[must_use]
    pub fn is_auction(&self) -> bool {
        matches!(self, Self::Auction(_))
    }

    #[must_use]
    pub fn as_auction(&self) -> Option<&AuctionState> {
        match self {
            Self::Auction(state) => Some(state),
            Self::FixedPrice => None,
        }
    }

    pub fn as_auction_mut(&mut self) -> Option<&mut AuctionState> {
        match self {
            Self::Auction(state) => Some(state),
            Self::FixedPrice => None,
        }
    }
}

impl std::fmt::Display for ListingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FixedPrice => write!(f, "FIXED_PRICE"),
            Self::Auction(_) => write!(f, "AUCTION"),
        }
    }
}

/// Everything a new listing needs except the ledger-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub token_id: TokenId,
    pub seller: Address,
    /// Fixed price, or the auction's starting price.
    pub price: Decimal,
    pub kind: ListingKind,
    pub created_at: DateTime<Utc>,
}

/// A stored listing. Never physically removed from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub token_id: TokenId,
    pub seller: Address,
    /// Fixed price, or the auction's starting price.
    pub price: Decimal,
    pub kind: ListingKind,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Materialize a draft under a ledger-assigned id. Always starts Active.
    #[must_use]
    pub fn from_draft(id: ListingId, draft: ListingDraft) -> Self {
        Self {
            id,
            token_id: draft.token_id,
            seller: draft.seller,
            price: draft.price,
            kind: draft.kind,
            status: ListingStatus::Active,
            created_at: draft.created_at,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    #[must_use]
    pub fn is_auction(&self) -> bool {
        self.kind.is_auction()
    }

    #[must_use]
    pub fn auction(&self) -> Option<&AuctionState> {
        self.kind.as_auction()
    }

    /// Auction still accepting bids at `now`.
    #[must_use]
    pub fn is_biddable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.auction().is_some_and(|a| a.is_open_at(now))
    }
}

/// Dummy listings for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Listing {
    #[must_use]
    pub fn dummy_fixed(id: u64, token: u64, price: Decimal) -> Self {
        Self {
            id: ListingId(id),
            token_id: TokenId(token),
            seller: Address::random(),
            price,
            kind: ListingKind::FixedPrice,
            status: ListingStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn dummy_auction(id: u64, token: u64, starting_price: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: ListingId(id),
            token_id: TokenId(token),
            seller: Address::random(),
            price: starting_price,
            kind: ListingKind::Auction(AuctionState::new(
                starting_price,
                now + chrono::Duration::hours(1),
            )),
            status: ListingStatus::Active,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_price_transitions() {
        let active = ListingStatus::Active;
        assert!(active.can_transition_to(ListingStatus::Sold, false));
        assert!(active.can_transition_to(ListingStatus::Cancelled, false));
        assert!(!active.can_transition_to(ListingStatus::Finalized, false));
    }

    #[test]
    fn auction_transitions() {
        let active = ListingStatus::Active;
        assert!(active.can_transition_to(ListingStatus::Finalized, true));
        assert!(active.can_transition_to(ListingStatus::Cancelled, true));
        assert!(!active.can_transition_to(ListingStatus::Sold, true));
    }

    #[test]
    fn terminal_states_are_immutable() {
        for terminal in [
            ListingStatus::Sold,
            ListingStatus::Cancelled,
            ListingStatus::Finalized,
        ] {
            assert!(terminal.is_terminal());
            for target in [
                ListingStatus::Active,
                ListingStatus::Sold,
                ListingStatus::Cancelled,
                ListingStatus::Finalized,
            ] {
                assert!(!terminal.can_transition_to(target, true));
                assert!(!terminal.can_transition_to(target, false));
            }
        }
    }

    #[test]
    fn auction_open_strictly_before_end() {
        let end = Utc::now();
        let state = AuctionState::new(Decimal::ONE, end);
        assert!(state.is_open_at(end - chrono::Duration::seconds(1)));
        assert!(!state.is_open_at(end));
        assert!(!state.has_bids());
    }

    #[test]
    fn biddable_requires_auction_and_active() {
        let fixed = Listing::dummy_fixed(1, 7, Decimal::ONE);
        assert!(!fixed.is_biddable_at(Utc::now()));

        let mut auction = Listing::dummy_auction(2, 8, Decimal::ONE);
        assert!(auction.is_biddable_at(Utc::now()));
        auction.status = ListingStatus::Cancelled;
        assert!(!auction.is_biddable_at(Utc::now()));
    }

    #[test]
    fn from_draft_starts_active() {
        let draft = ListingDraft {
            token_id: TokenId(3),
            seller: Address::repeat_byte(1),
            price: Decimal::new(5, 1),
            kind: ListingKind::FixedPrice,
            created_at: Utc::now(),
        };
        let listing = Listing::from_draft(ListingId(4), draft);
        assert_eq!(listing.status, ListingStatus::Active);
        assert_eq!(listing.id, ListingId(4));
        assert_eq!(listing.kind.to_string(), "FIXED_PRICE");
    }
}
