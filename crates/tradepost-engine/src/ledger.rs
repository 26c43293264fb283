//! Ledger store: the system of record for listings.
//!
//! Ids are assigned monotonically from 1 and never reused. Records are never
//! removed; terminal statuses are immutable. Reads are open to anyone, but
//! every write takes a [`WriteCapability`], which only this crate can
//! construct, so callers outside the state machine cannot mutate listings.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradepost_types::{
    Address, Listing, ListingDraft, ListingId, ListingStatus, MarketError, Result, TokenId,
};

/// Proof that the caller is the state machine.
#[derive(Debug)]
pub struct WriteCapability {
    _private: (),
}

impl WriteCapability {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// Serializable image of a [`LedgerStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub next_id: ListingId,
    pub listings: Vec<Listing>,
}

/// Listing records keyed by id, plus a token → active listing index.
#[derive(Debug)]
pub struct LedgerStore {
    listings: BTreeMap<ListingId, Listing>,
    next_id: ListingId,
    active_by_token: HashMap<TokenId, ListingId>,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self {
            listings: BTreeMap::new(),
            next_id: ListingId::FIRST,
            active_by_token: HashMap::new(),
        }
    }
}

impl LedgerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new Active listing and return its id.
    ///
    /// # Errors
    /// Returns `AlreadyListed` if an Active listing references the token.
    pub fn create(&mut self, _cap: &WriteCapability, draft: ListingDraft) -> Result<ListingId> {
        if self.active_by_token.contains_key(&draft.token_id) {
            return Err(MarketError::AlreadyListed(draft.token_id));
        }
        let id = self.next_id;
        self.next_id = id.next();
        self.active_by_token.insert(draft.token_id, id);
        self.listings.insert(id, Listing::from_draft(id, draft));
        Ok(id)
    }

    /// # Errors
    /// Returns `ListingNotFound` for an unknown id.
    pub fn get(&self, id: ListingId) -> Result<&Listing> {
        self.listings.get(&id).ok_or(MarketError::ListingNotFound(id))
    }

    /// Move a listing to `status`.
    ///
    /// # Errors
    /// - `ListingNotFound` for an unknown id
    /// - `InvariantViolation` for a transition the state machine forbids
    pub fn set_status(
        &mut self,
        _cap: &WriteCapability,
        id: ListingId,
        status: ListingStatus,
    ) -> Result<()> {
        let listing = self
            .listings
            .get_mut(&id)
            .ok_or(MarketError::ListingNotFound(id))?;
        if !listing.status.can_transition_to(status, listing.is_auction()) {
            return Err(MarketError::InvariantViolation {
                reason: format!(
                    "illegal transition {} -> {status} on {id} ({})",
                    listing.status, listing.kind
                ),
            });
        }
        listing.status = status;
        if status.is_terminal() {
            self.active_by_token.remove(&listing.token_id);
        }
        Ok(())
    }

    /// Record a new highest bid on an Active auction.
    ///
    /// # Errors
    /// - `ListingNotFound` for an unknown id
    /// - `InvariantViolation` if the listing is not an Active auction or the
    ///   bid does not raise the highest bid
    pub fn record_bid(
        &mut self,
        _cap: &WriteCapability,
        id: ListingId,
        bidder: Address,
        amount: Decimal,
    ) -> Result<()> {
        let listing = self
            .listings
            .get_mut(&id)
            .ok_or(MarketError::ListingNotFound(id))?;
        let active = listing.is_active();
        let Some(auction) = listing.kind.as_auction_mut() else {
            return Err(MarketError::InvariantViolation {
                reason: format!("bid recorded on fixed-price {id}"),
            });
        };
        if !active || amount <= auction.highest_bid {
            return Err(MarketError::InvariantViolation {
                reason: format!(
                    "bid {amount} on {id} does not raise highest {} (active={active})",
                    auction.highest_bid
                ),
            });
        }
        auction.highest_bid = amount;
        auction.highest_bidder = Some(bidder);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Every listing ever created, in id order.
    pub fn listings(&self) -> impl Iterator<Item = &Listing> {
        self.listings.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Number of Active listings (fixed price and auctions).
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_by_token.len()
    }

    #[must_use]
    pub fn is_token_listed(&self, token_id: TokenId) -> bool {
        self.active_by_token.contains_key(&token_id)
    }

    /// The Active listing for `token_id`, if any.
    #[must_use]
    pub fn listing_id_for_token(&self, token_id: TokenId) -> Option<ListingId> {
        self.active_by_token.get(&token_id).copied()
    }

    /// The id the next created listing will receive.
    #[must_use]
    pub fn next_id(&self) -> ListingId {
        self.next_id
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            next_id: self.next_id,
            listings: self.listings.values().cloned().collect(),
        }
    }

    /// Rebuild the store and its token index from a snapshot.
    ///
    /// # Errors
    /// Returns `InvariantViolation` for duplicate ids, ids at or beyond
    /// `next_id`, or two Active listings on one token.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self> {
        let mut store = Self {
            listings: BTreeMap::new(),
            next_id: snapshot.next_id,
            active_by_token: HashMap::new(),
        };
        for listing in snapshot.listings {
            let id = listing.id;
            if id.0 == 0 || id >= store.next_id {
                return Err(MarketError::InvariantViolation {
                    reason: format!("{id} outside assigned range (next {})", store.next_id),
                });
            }
            if listing.is_active()
                && store
                    .active_by_token
                    .insert(listing.token_id, id)
                    .is_some()
            {
                return Err(MarketError::InvariantViolation {
                    reason: format!("{} has two active listings", listing.token_id),
                });
            }
            if store.listings.insert(id, listing).is_some() {
                return Err(MarketError::InvariantViolation {
                    reason: format!("duplicate {id} in snapshot"),
                });
            }
        }
        Ok(store)
    }
}
