//! Thread-safe handle over one [`Marketplace`].
//!
//! Every mutating call takes the exclusive write lock for its whole
//! duration, so transitions are totally ordered by lock acquisition. Reads
//! share the read lock and see a consistent state. Nothing blocks on time:
//! expiry is evaluated against the clock inside each call.

use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tradepost_types::{
    Address, CommitmentHash, EventRecord, Listing, ListingId, Result, Salt, TokenId,
};

use crate::collaborators::{Clock, TokenRegistry};
use crate::marketplace::{Marketplace, Payout};
use crate::snapshot::MarketSnapshot;
use crate::state_machine::{BidReceipt, Settlement};

pub struct SharedMarketplace<R, C> {
    inner: Arc<RwLock<Marketplace<R, C>>>,
}

impl<R, C> Clone for SharedMarketplace<R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: TokenRegistry, C: Clock> SharedMarketplace<R, C> {
    #[must_use]
    pub fn new(market: Marketplace<R, C>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(market)),
        }
    }

    /// Run `f` under the shared read lock.
    pub fn read<T>(&self, f: impl FnOnce(&Marketplace<R, C>) -> T) -> T {
        f(&*self.inner.read())
    }

    /// Run `f` under the exclusive write lock.
    pub fn write<T>(&self, f: impl FnOnce(&mut Marketplace<R, C>) -> T) -> T {
        f(&mut *self.inner.write())
    }

    // -----------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------

    pub fn create_listing(
        &self,
        seller: Address,
        token_id: TokenId,
        price: Decimal,
    ) -> Result<ListingId> {
        self.write(|m| m.create_listing(seller, token_id, price))
    }

    pub fn create_auction(
        &self,
        seller: Address,
        token_id: TokenId,
        starting_price: Decimal,
        duration: Duration,
    ) -> Result<ListingId> {
        self.write(|m| m.create_auction(seller, token_id, starting_price, duration))
    }

    pub fn place_bid(
        &self,
        bidder: Address,
        listing_id: ListingId,
        amount: Decimal,
    ) -> Result<BidReceipt> {
        self.write(|m| m.place_bid(bidder, listing_id, amount))
    }

    pub fn buy_listing(
        &self,
        buyer: Address,
        listing_id: ListingId,
        payment: Decimal,
    ) -> Result<Settlement> {
        self.write(|m| m.buy_listing(buyer, listing_id, payment))
    }

    pub fn finalize_auction(&self, listing_id: ListingId) -> Result<Settlement> {
        self.write(|m| m.finalize_auction(listing_id))
    }

    pub fn cancel_listing(&self, caller: Address, listing_id: ListingId) -> Result<()> {
        self.write(|m| m.cancel_listing(caller, listing_id))
    }

    pub fn commit(&self, committer: Address, hash: CommitmentHash) -> Result<()> {
        self.write(|m| m.commit(committer, hash))
    }

    pub fn reveal(
        &self,
        committer: Address,
        token_id: TokenId,
        price: Decimal,
        salt: Salt,
    ) -> Result<ListingId> {
        self.write(|m| m.reveal(committer, token_id, price, salt))
    }

    pub fn invalidate_expired(&self, committer: Address) -> Result<()> {
        self.write(|m| m.invalidate_expired(committer))
    }

    pub fn withdraw(&self, caller: Address) -> Result<Payout> {
        self.write(|m| m.withdraw(caller))
    }

    pub fn withdraw_fees(&self, caller: Address) -> Result<Payout> {
        self.write(|m| m.withdraw_fees(caller))
    }

    pub fn set_emergency_stop(&self, caller: Address, stopped: bool) -> Result<()> {
        self.write(|m| m.set_emergency_stop(caller, stopped))
    }

    /// Flip the emergency stop and return the new value.
    pub fn toggle_emergency_stop(&self, caller: Address) -> Result<bool> {
        self.write(|m| m.toggle_emergency_stop(caller))
    }

    pub fn set_fee_rate(&self, caller: Address, fee_bps: u32) -> Result<()> {
        self.write(|m| m.set_fee_rate(caller, fee_bps))
    }

    pub fn transfer_ownership(&self, caller: Address, new_owner: Address) -> Result<()> {
        self.write(|m| m.transfer_ownership(caller, new_owner))
    }

    pub fn drain_events(&self) -> Vec<EventRecord> {
        self.write(Marketplace::drain_events)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// A copy of the listing as of now.
    pub fn listing(&self, id: ListingId) -> Result<Listing> {
        self.read(|m| m.listing(id).cloned())
    }

    pub fn balance_of(&self, address: Address) -> Decimal {
        self.read(|m| m.balance_of(address))
    }

    pub fn protocol_fees(&self) -> Decimal {
        self.read(Marketplace::protocol_fees)
    }

    pub fn active_listing_count(&self) -> usize {
        self.read(Marketplace::active_listing_count)
    }

    pub fn owner(&self) -> Address {
        self.read(Marketplace::owner)
    }

    pub fn fee_bps(&self) -> u32 {
        self.read(|m| m.config().fee_bps)
    }

    pub fn emergency_stop(&self) -> bool {
        self.read(Marketplace::emergency_stop)
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        self.read(Marketplace::snapshot)
    }

    pub fn verify_invariants(&self) -> Result<()> {
        self.read(Marketplace::verify_invariants)
    }
}
