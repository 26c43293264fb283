//! The `Marketplace` facade: one authoritative ledger behind one call
//! interface.
//!
//! Each call reads the clock once, builds a call context from the admin
//! surface, dispatches to the state machine or the commit-reveal
//! coordinator, and on success appends the matching [`MarketEvent`].
//! Withdrawals, owner setters and queries are not gated by the emergency
//! stop; a pause freezes trading only.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradepost_escrow::EscrowAccount;
use tradepost_types::{
    Address, Commitment, CommitmentHash, ErrorClass, EventRecord, Listing, ListingId,
    ListingStatus, MarketConfig, MarketError, MarketEvent, Result, Salt, TokenId,
};

use crate::admin::AdminControl;
use crate::collaborators::{Clock, TokenRegistry};
use crate::commit_reveal::{CommitRevealCoordinator, RevealRequest};
use crate::events::EventLog;
use crate::ledger::LedgerStore;
use crate::snapshot::{MarketSnapshot, SNAPSHOT_FORMAT_VERSION};
use crate::state_machine::{BidReceipt, Settlement, StateMachine};

/// Funds released from escrow. The ledger entry is already zeroed; the
/// caller performs the actual transfer.
#[must_use = "a payout must be executed by the caller"]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub to: Address,
    pub amount: Decimal,
}

/// Settlement engine for listings, auctions and commit-reveal listing.
pub struct Marketplace<R, C> {
    admin: AdminControl,
    machine: StateMachine,
    commits: CommitRevealCoordinator,
    events: EventLog,
    registry: R,
    clock: C,
    /// Address the registry must approve for transfers.
    operator: Address,
}

impl<R: TokenRegistry, C: Clock> Marketplace<R, C> {
    /// Start an empty marketplace owned by `owner`.
    ///
    /// # Errors
    /// Rejects an invalid config or a zero owner.
    pub fn new(
        owner: Address,
        operator: Address,
        config: MarketConfig,
        registry: R,
        clock: C,
    ) -> Result<Self> {
        let admin = AdminControl::new(owner, config)?;
        tracing::info!(
            %owner,
            %operator,
            fee_bps = admin.config().fee_bps,
            "Marketplace initialized"
        );
        Ok(Self {
            admin,
            machine: StateMachine::new(),
            commits: CommitRevealCoordinator::new(),
            events: EventLog::new(),
            registry,
            clock,
            operator,
        })
    }

    // =================================================================
    // Listings and auctions
    // =================================================================

    /// # Errors
    /// See [`StateMachine::create_listing`].
    pub fn create_listing(
        &mut self,
        seller: Address,
        token_id: TokenId,
        price: Decimal,
    ) -> Result<ListingId> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        let stale = self.machine.ledger().listing_id_for_token(token_id);
        let id = observe(
            "create_listing",
            self.machine
                .create_listing(&ctx, &self.registry, token_id, price, seller),
        )?;
        self.emit_retired(stale, now)?;
        self.events.emit(
            MarketEvent::ListingCreated {
                listing_id: id,
                token_id,
                seller,
                price,
            },
            now,
        );
        Ok(id)
    }

    /// # Errors
    /// See [`StateMachine::create_auction`].
    pub fn create_auction(
        &mut self,
        seller: Address,
        token_id: TokenId,
        starting_price: Decimal,
        duration: Duration,
    ) -> Result<ListingId> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        let stale = self.machine.ledger().listing_id_for_token(token_id);
        let id = observe(
            "create_auction",
            self.machine.create_auction(
                &ctx,
                &self.registry,
                token_id,
                starting_price,
                duration,
                seller,
            ),
        )?;
        self.emit_retired(stale, now)?;
        self.events.emit(
            MarketEvent::AuctionCreated {
                listing_id: id,
                token_id,
                seller,
                starting_price,
                end_time: now + duration,
            },
            now,
        );
        Ok(id)
    }

    /// Bid `amount`, which accompanies the call.
    ///
    /// # Errors
    /// See [`StateMachine::place_bid`].
    pub fn place_bid(
        &mut self,
        bidder: Address,
        listing_id: ListingId,
        amount: Decimal,
    ) -> Result<BidReceipt> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        let receipt = observe(
            "place_bid",
            self.machine.place_bid(&ctx, listing_id, bidder, amount),
        )?;
        self.check_conservation()?;
        self.events.emit(
            MarketEvent::BidPlaced {
                listing_id,
                bidder,
                amount,
                outbid: receipt.outbid.map(|(previous, _)| previous),
            },
            now,
        );
        Ok(receipt)
    }

    /// Buy with `payment`, which accompanies the call.
    ///
    /// # Errors
    /// See [`StateMachine::buy_listing`].
    pub fn buy_listing(
        &mut self,
        buyer: Address,
        listing_id: ListingId,
        payment: Decimal,
    ) -> Result<Settlement> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        let settlement = observe(
            "buy_listing",
            self.machine
                .buy_listing(&ctx, &mut self.registry, listing_id, buyer, payment),
        )?;
        self.check_conservation()?;
        self.events.emit(
            MarketEvent::ListingSold {
                listing_id,
                buyer,
                price: settlement.gross,
                fee: settlement.fee,
            },
            now,
        );
        Ok(settlement)
    }

    /// Resolve an ended auction. Anyone may call.
    ///
    /// # Errors
    /// See [`StateMachine::finalize_auction`].
    pub fn finalize_auction(&mut self, listing_id: ListingId) -> Result<Settlement> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        let settlement = observe(
            "finalize_auction",
            self.machine
                .finalize_auction(&ctx, &mut self.registry, listing_id),
        )?;
        self.check_conservation()?;
        self.events.emit(
            MarketEvent::AuctionFinalized {
                listing_id,
                winner: settlement.counterparty,
                amount: settlement.gross,
                fee: settlement.fee,
                refunded: settlement.refunded.map(|(bidder, _)| bidder),
            },
            now,
        );
        Ok(settlement)
    }

    /// # Errors
    /// See [`StateMachine::cancel_listing`].
    pub fn cancel_listing(&mut self, caller: Address, listing_id: ListingId) -> Result<()> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        observe(
            "cancel_listing",
            self.machine.cancel_listing(&ctx, listing_id, caller),
        )?;
        self.events
            .emit(MarketEvent::ListingCancelled { listing_id }, now);
        Ok(())
    }

    // =================================================================
    // Commit-reveal
    // =================================================================

    /// # Errors
    /// See [`CommitRevealCoordinator::commit`].
    pub fn commit(&mut self, committer: Address, hash: CommitmentHash) -> Result<()> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        let replaced = observe("commit", self.commits.commit(&ctx, committer, hash))?;
        if replaced.is_some() {
            self.events
                .emit(MarketEvent::CommitmentInvalidated { committer }, now);
        }
        self.events
            .emit(MarketEvent::CommitmentSubmitted { committer, hash }, now);
        Ok(())
    }

    /// Reveal the pre-image and create the fixed-price listing it commits to.
    ///
    /// # Errors
    /// See [`CommitRevealCoordinator::reveal`].
    pub fn reveal(
        &mut self,
        committer: Address,
        token_id: TokenId,
        price: Decimal,
        salt: Salt,
    ) -> Result<ListingId> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        let request = RevealRequest {
            token_id,
            price,
            salt,
        };
        let stale = self.machine.ledger().listing_id_for_token(token_id);
        let listing_id = observe(
            "reveal",
            self.commits.reveal(
                &ctx,
                &mut self.machine,
                &self.registry,
                committer,
                &request,
            ),
        )?;
        self.emit_retired(stale, now)?;
        self.events.emit(
            MarketEvent::ListingCreated {
                listing_id,
                token_id,
                seller: committer,
                price,
            },
            now,
        );
        self.events.emit(
            MarketEvent::CommitmentRevealed {
                committer,
                listing_id,
            },
            now,
        );
        Ok(listing_id)
    }

    /// Drop `committer`'s expired commitment. Anyone may call.
    ///
    /// # Errors
    /// See [`CommitRevealCoordinator::invalidate_expired`].
    pub fn invalidate_expired(&mut self, committer: Address) -> Result<()> {
        let now = self.clock.now();
        let ctx = self.admin.context(now, self.operator);
        observe(
            "invalidate_expired",
            self.commits.invalidate_expired(&ctx, committer),
        )?;
        self.events
            .emit(MarketEvent::CommitmentInvalidated { committer }, now);
        Ok(())
    }

    // =================================================================
    // Withdrawals (available during an emergency stop)
    // =================================================================

    /// Zero `caller`'s withdrawable balance and return the payout.
    ///
    /// # Errors
    /// `NothingToWithdraw` on a zero balance.
    pub fn withdraw(&mut self, caller: Address) -> Result<Payout> {
        let amount = observe("withdraw", self.machine.escrow_mut().withdraw(caller))?;
        self.check_conservation()?;
        tracing::info!(to = %caller, %amount, "Funds withdrawn");
        self.events.emit(
            MarketEvent::FundsWithdrawn { to: caller, amount },
            self.clock.now(),
        );
        Ok(Payout { to: caller, amount })
    }

    /// Zero the protocol-fee balance and pay it to the owner.
    ///
    /// # Errors
    /// `NotOwner`, or `NothingToWithdraw` when no fees have accrued.
    pub fn withdraw_fees(&mut self, caller: Address) -> Result<Payout> {
        observe("withdraw_fees", self.admin.flag().ensure_owner(caller))?;
        if self.machine.escrow().protocol_fees().is_zero() {
            return observe("withdraw_fees", Err(MarketError::NothingToWithdraw(caller)));
        }
        let amount = observe("withdraw_fees", self.machine.escrow_mut().withdraw_fees())?;
        self.check_conservation()?;
        tracing::info!(to = %caller, %amount, "Protocol fees withdrawn");
        self.events.emit(
            MarketEvent::FeesWithdrawn { to: caller, amount },
            self.clock.now(),
        );
        Ok(Payout { to: caller, amount })
    }

    // =================================================================
    // Admin
    // =================================================================

    /// # Errors
    /// `NotOwner`.
    pub fn set_emergency_stop(&mut self, caller: Address, stopped: bool) -> Result<()> {
        let changed = observe(
            "set_emergency_stop",
            self.admin.set_emergency_stop(caller, stopped),
        )?;
        if changed {
            if stopped {
                tracing::warn!(owner = %caller, "Emergency stop engaged");
            } else {
                tracing::info!(owner = %caller, "Emergency stop lifted");
            }
            self.events
                .emit(MarketEvent::EmergencyStopChanged { stopped }, self.clock.now());
        }
        Ok(())
    }

    /// Flip the emergency stop and return the new value.
    ///
    /// # Errors
    /// `NotOwner`.
    pub fn toggle_emergency_stop(&mut self, caller: Address) -> Result<bool> {
        let stopped = !self.admin.is_stopped();
        self.set_emergency_stop(caller, stopped)?;
        Ok(stopped)
    }

    /// # Errors
    /// `NotOwner`, `InvalidFeeRate`.
    pub fn set_fee_rate(&mut self, caller: Address, fee_bps: u32) -> Result<()> {
        observe("set_fee_rate", self.admin.set_fee_rate(caller, fee_bps))?;
        tracing::info!(fee_bps, "Fee rate changed");
        self.events
            .emit(MarketEvent::FeeRateChanged { fee_bps }, self.clock.now());
        Ok(())
    }

    /// # Errors
    /// `NotOwner`, `InvalidAddress`.
    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> Result<()> {
        let previous = observe(
            "transfer_ownership",
            self.admin.transfer_ownership(caller, new_owner),
        )?;
        tracing::info!(%previous, owner = %new_owner, "Ownership transferred");
        self.events.emit(
            MarketEvent::OwnershipTransferred {
                previous,
                owner: new_owner,
            },
            self.clock.now(),
        );
        Ok(())
    }

    // =================================================================
    // Queries (available during an emergency stop)
    // =================================================================

    /// # Errors
    /// `ListingNotFound`.
    pub fn listing(&self, id: ListingId) -> Result<&Listing> {
        self.machine.ledger().get(id)
    }

    /// Every listing ever created, in id order.
    pub fn listings(&self) -> impl Iterator<Item = &Listing> {
        self.machine.ledger().listings()
    }

    /// Active fixed-price listings.
    pub fn active_listings(&self) -> impl Iterator<Item = &Listing> {
        self.listings()
            .filter(|l| l.is_active() && !l.is_auction())
    }

    /// Active auctions, including ones past their end time awaiting finalize.
    pub fn active_auctions(&self) -> impl Iterator<Item = &Listing> {
        self.listings().filter(|l| l.is_active() && l.is_auction())
    }

    #[must_use]
    pub fn active_listing_count(&self) -> usize {
        self.machine.ledger().active_count()
    }

    #[must_use]
    pub fn is_token_listed(&self, token_id: TokenId) -> bool {
        self.machine.ledger().is_token_listed(token_id)
    }

    #[must_use]
    pub fn listing_id_for_token(&self, token_id: TokenId) -> Option<ListingId> {
        self.machine.ledger().listing_id_for_token(token_id)
    }

    /// Withdrawable balance of `address`.
    #[must_use]
    pub fn balance_of(&self, address: Address) -> Decimal {
        self.machine.escrow().balance_of(address)
    }

    /// Funds `address` has locked against `auction`.
    #[must_use]
    pub fn locked_amount(&self, auction: ListingId, address: Address) -> Decimal {
        self.machine.escrow().locked_amount(auction, address)
    }

    #[must_use]
    pub fn protocol_fees(&self) -> Decimal {
        self.machine.escrow().protocol_fees()
    }

    #[must_use]
    pub fn owner(&self) -> Address {
        self.admin.owner()
    }

    #[must_use]
    pub fn emergency_stop(&self) -> bool {
        self.admin.is_stopped()
    }

    #[must_use]
    pub fn config(&self) -> &MarketConfig {
        self.admin.config()
    }

    #[must_use]
    pub fn operator(&self) -> Address {
        self.operator
    }

    #[must_use]
    pub fn commitment_of(&self, committer: Address) -> Option<&Commitment> {
        self.commits.commitment_of(committer)
    }

    #[must_use]
    pub fn escrow(&self) -> &EscrowAccount {
        self.machine.escrow()
    }

    #[must_use]
    pub fn ledger(&self) -> &LedgerStore {
        self.machine.ledger()
    }

    #[must_use]
    pub fn pending_events(&self) -> &[EventRecord] {
        self.events.pending()
    }

    /// Hand every event emitted since the last drain to the caller.
    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        self.events.drain()
    }

    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// The registry is an external collaborator; mutating it directly
    /// (minting, approvals) bypasses the ledger entirely.
    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Check the ledger/escrow invariants end to end.
    ///
    /// - funds conservation
    /// - each Active auction with a bidder has exactly `highest_bid` locked,
    ///   all of it by that bidder
    /// - nothing is locked against any other listing
    /// - the token index counts exactly the Active listings
    ///
    /// # Errors
    /// `InvariantViolation` naming the first broken invariant.
    pub fn verify_invariants(&self) -> Result<()> {
        let escrow = self.machine.escrow();
        escrow.verify_conservation()?;
        let mut active = 0usize;
        for listing in self.listings() {
            if listing.is_active() {
                active += 1;
            }
            let expected = match (listing.is_active(), listing.auction()) {
                (true, Some(auction)) => auction
                    .highest_bidder
                    .map(|bidder| (bidder, auction.highest_bid)),
                _ => None,
            };
            let locked = escrow.locked_against(listing.id);
            let consistent = match expected {
                Some((bidder, amount)) => {
                    locked == amount && escrow.locked_amount(listing.id, bidder) == amount
                }
                None => locked.is_zero(),
            };
            if !consistent {
                return Err(MarketError::InvariantViolation {
                    reason: format!(
                        "{} has {locked} locked, expected {:?}",
                        listing.id, expected
                    ),
                });
            }
        }
        if active != self.active_listing_count() {
            return Err(MarketError::InvariantViolation {
                reason: format!(
                    "token index holds {} active listings, ledger has {active}",
                    self.active_listing_count()
                ),
            });
        }
        Ok(())
    }

    // =================================================================
    // Persistence
    // =================================================================

    /// Capture the full engine state. Undrained events are not included.
    #[must_use]
    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            taken_at: self.clock.now(),
            operator: self.operator,
            flag: self.admin.flag().clone(),
            config: self.admin.config().clone(),
            ledger: self.machine.ledger().snapshot(),
            escrow: self.machine.escrow().snapshot(),
            commitments: self.commits.commitments().cloned().collect(),
            next_event_sequence: self.events.next_sequence(),
        }
    }

    /// Resume from a snapshot against the given collaborators.
    ///
    /// # Errors
    /// `Serialization` for an unknown format version, `InvariantViolation`
    /// for an inconsistent snapshot, config errors for a bad config.
    pub fn restore(snapshot: MarketSnapshot, registry: R, clock: C) -> Result<Self> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(MarketError::Serialization(format!(
                "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT_VERSION})",
                snapshot.format_version
            )));
        }
        let market = Self {
            admin: AdminControl::from_parts(snapshot.flag, snapshot.config)?,
            machine: StateMachine::from_parts(
                LedgerStore::from_snapshot(snapshot.ledger)?,
                EscrowAccount::from_snapshot(snapshot.escrow)?,
            ),
            commits: CommitRevealCoordinator::from_commitments(snapshot.commitments)?,
            events: EventLog::starting_at(snapshot.next_event_sequence),
            registry,
            clock,
            operator: snapshot.operator,
        };
        market.verify_invariants()?;
        tracing::info!(
            listings = market.ledger().len(),
            active = market.active_listing_count(),
            "Marketplace restored from snapshot"
        );
        Ok(market)
    }

    // =================================================================
    // Helpers
    // =================================================================

    fn check_conservation(&self) -> Result<()> {
        observe(
            "conservation",
            self.machine.escrow().verify_conservation(),
        )
    }

    /// After a successful create, a listing that was Active for the token
    /// beforehand has been retired as stale.
    fn emit_retired(&mut self, stale: Option<ListingId>, now: DateTime<Utc>) -> Result<()> {
        let Some(listing_id) = stale else {
            return Ok(());
        };
        if self.machine.ledger().get(listing_id)?.status == ListingStatus::Cancelled {
            self.check_conservation()?;
            self.events
                .emit(MarketEvent::ListingCancelled { listing_id }, now);
        }
        Ok(())
    }
}

impl<R, C> std::fmt::Debug for Marketplace<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marketplace")
            .field("owner", &self.admin.owner())
            .field("operator", &self.operator)
            .field("emergency_stop", &self.admin.is_stopped())
            .field("listings", &self.machine.ledger().len())
            .finish_non_exhaustive()
    }
}

/// Log a rejected call at a level matching its class.
fn observe<T>(op: &'static str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        match err.class() {
            ErrorClass::InvariantViolation => {
                tracing::error!(op, error = %err, "Invariant violation");
            }
            ErrorClass::Authorization | ErrorClass::SystemPaused => {
                tracing::warn!(op, error = %err, "Call rejected");
            }
            _ if matches!(err, MarketError::HashMismatch) => {
                tracing::warn!(op, error = %err, "Call rejected");
            }
            _ => tracing::debug!(op, error = %err, "Call rejected"),
        }
    }
    result
}

