//! Listing/auction state machine.
//!
//! Validates and applies create, bid, buy, finalize and cancel. Every call
//! checks the [`SystemFlag`] first, then runs all validation against the
//! current ledger before touching anything, so a rejected call leaves the
//! ledger, escrow and token registry exactly as they were.
//!
//! ```text
//!   fixed price:  ACTIVE ──buy──▶ SOLD      ACTIVE ──cancel──▶ CANCELLED
//!   auction:      ACTIVE ──finalize──▶ FINALIZED   (cancel only without bids)
//! ```
//!
//! The token stays with the seller until a sale or finalize; the registry
//! transfer runs after validation (including a dry run of the escrow
//! posting) and before any ledger or escrow write.
//!
//! Because the seller keeps the token, it can leave their hands while a
//! listing is open. A new owner who lists it retires the stale listing;
//! an auction whose seller can no longer deliver finalizes as a refund.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradepost_escrow::EscrowAccount;
use tradepost_types::{
    Address, AuctionState, ListingDraft, ListingId, ListingKind, ListingStatus, MarketConfig,
    MarketError, Result, SystemFlag, TokenId, constants, fee_for,
};

use crate::collaborators::TokenRegistry;
use crate::ledger::{LedgerStore, WriteCapability};

/// Per-call inputs every transition needs.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub flag: &'a SystemFlag,
    pub config: &'a MarketConfig,
    pub now: DateTime<Utc>,
    /// The marketplace's own address, which must hold transfer approval.
    pub operator: Address,
}

/// Result of an accepted bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidReceipt {
    pub listing_id: ListingId,
    pub bidder: Address,
    pub amount: Decimal,
    /// Previous highest bidder and the amount made withdrawable to them.
    pub outbid: Option<(Address, Decimal)>,
}

/// Result of a sale or a finalized auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub listing_id: ListingId,
    pub token_id: TokenId,
    pub seller: Address,
    /// Buyer or winning bidder; `None` for an auction that ended unbid or
    /// could not be delivered.
    pub counterparty: Option<Address>,
    pub gross: Decimal,
    pub fee: Decimal,
    /// Winning bid returned to the bidder because the seller no longer
    /// held the token or its approval at finalize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded: Option<(Address, Decimal)>,
}

impl Settlement {
    /// What the seller is credited.
    #[must_use]
    pub fn proceeds(&self) -> Decimal {
        self.gross - self.fee
    }
}

/// Owns the ledger and the escrow account and is the only writer of both.
#[derive(Debug)]
pub struct StateMachine {
    ledger: LedgerStore,
    escrow: EscrowAccount,
    cap: WriteCapability,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(LedgerStore::new(), EscrowAccount::new())
    }

    /// Resume from a restored ledger and escrow.
    #[must_use]
    pub fn from_parts(ledger: LedgerStore, escrow: EscrowAccount) -> Self {
        Self {
            ledger,
            escrow,
            cap: WriteCapability::new(),
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    #[must_use]
    pub fn escrow(&self) -> &EscrowAccount {
        &self.escrow
    }

    /// Mutable escrow access for withdrawals, which are not listing
    /// transitions.
    pub(crate) fn escrow_mut(&mut self) -> &mut EscrowAccount {
        &mut self.escrow
    }

    // -----------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------

    /// Open a fixed-price listing.
    ///
    /// An Active listing of the same token by someone who no longer owns
    /// it is cancelled first, refunding any locked bid.
    ///
    /// # Errors
    /// `SystemPaused`, `InvalidPrice`, `AmountOverflow`, `NotTokenOwner`,
    /// `NotApproved`, `AlreadyListed`.
    pub fn create_listing<R: TokenRegistry + ?Sized>(
        &mut self,
        ctx: &CallContext<'_>,
        registry: &R,
        token_id: TokenId,
        price: Decimal,
        seller: Address,
    ) -> Result<ListingId> {
        ctx.flag.ensure_live()?;
        ensure_positive_price(price)?;
        let stale = self.ensure_listable(ctx, registry, token_id, seller)?;
        if let Some(stale) = stale {
            self.retire_stale(stale)?;
        }

        let id = self.ledger.create(
            &self.cap,
            ListingDraft {
                token_id,
                seller,
                price,
                kind: ListingKind::FixedPrice,
                created_at: ctx.now,
            },
        )?;
        tracing::info!(
            listing = %id,
            token = %token_id,
            seller = %seller,
            %price,
            "Listing created"
        );
        Ok(id)
    }

    /// Open a timed auction ending at `now + duration`. Stale listings of
    /// the token are retired as in [`create_listing`](Self::create_listing).
    ///
    /// # Errors
    /// `SystemPaused`, `InvalidPrice`, `AmountOverflow`, `InvalidDuration`,
    /// `NotTokenOwner`, `NotApproved`, `AlreadyListed`.
    pub fn create_auction<R: TokenRegistry + ?Sized>(
        &mut self,
        ctx: &CallContext<'_>,
        registry: &R,
        token_id: TokenId,
        starting_price: Decimal,
        duration: Duration,
        seller: Address,
    ) -> Result<ListingId> {
        ctx.flag.ensure_live()?;
        ensure_positive_price(starting_price)?;
        if duration < ctx.config.min_auction() || duration > ctx.config.max_auction() {
            return Err(MarketError::InvalidDuration {
                secs: duration.num_seconds(),
                min_secs: ctx.config.min_auction_secs,
                max_secs: ctx.config.max_auction_secs,
            });
        }
        let stale = self.ensure_listable(ctx, registry, token_id, seller)?;
        if let Some(stale) = stale {
            self.retire_stale(stale)?;
        }

        let end_time = ctx.now + duration;
        let id = self.ledger.create(
            &self.cap,
            ListingDraft {
                token_id,
                seller,
                price: starting_price,
                kind: ListingKind::Auction(AuctionState::new(starting_price, end_time)),
                created_at: ctx.now,
            },
        )?;
        tracing::info!(
            listing = %id,
            token = %token_id,
            seller = %seller,
            %starting_price,
            %end_time,
            "Auction created"
        );
        Ok(id)
    }

    // -----------------------------------------------------------------
    // Bidding
    // -----------------------------------------------------------------

    /// Admit a bid whose funds accompany the call.
    ///
    /// The previous highest bidder's lock becomes withdrawable and the new
    /// amount is locked in full, including when the same bidder raises.
    ///
    /// # Errors
    /// `SystemPaused`, `ListingNotFound`, `NotAnAuction`, `AuctionNotActive`,
    /// `BidTooLow`, `SelfBid`, `AmountOverflow`.
    pub fn place_bid(
        &mut self,
        ctx: &CallContext<'_>,
        listing_id: ListingId,
        bidder: Address,
        amount: Decimal,
    ) -> Result<BidReceipt> {
        ctx.flag.ensure_live()?;
        let listing = self.ledger.get(listing_id)?;
        let Some(auction) = listing.auction() else {
            return Err(MarketError::NotAnAuction(listing_id));
        };
        if !listing.is_active() || !auction.is_open_at(ctx.now) {
            return Err(MarketError::AuctionNotActive(listing_id));
        }
        if amount <= auction.highest_bid {
            return Err(MarketError::BidTooLow {
                bid: amount,
                highest: auction.highest_bid,
            });
        }
        if bidder == listing.seller {
            return Err(MarketError::SelfBid(listing_id));
        }
        ensure_fee_computable(amount)?;
        let outbid = auction
            .highest_bidder
            .map(|previous| (previous, auction.highest_bid));

        self.escrow
            .replace_bid(listing_id, outbid, bidder, amount)?;
        self.ledger
            .record_bid(&self.cap, listing_id, bidder, amount)?;

        tracing::info!(
            listing = %listing_id,
            bidder = %bidder,
            %amount,
            outbid = ?outbid.map(|(a, _)| a),
            "Bid accepted"
        );
        Ok(BidReceipt {
            listing_id,
            bidder,
            amount,
            outbid,
        })
    }

    // -----------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------

    /// Buy a fixed-price listing with the payment that accompanied the call.
    ///
    /// # Errors
    /// `SystemPaused`, `ListingNotFound`, `ListingNotActive`, `NotFixedPrice`,
    /// `SelfPurchase`, `WrongAmount`, `AmountOverflow`, `TokenTransferFailed`.
    pub fn buy_listing<R: TokenRegistry + ?Sized>(
        &mut self,
        ctx: &CallContext<'_>,
        registry: &mut R,
        listing_id: ListingId,
        buyer: Address,
        payment: Decimal,
    ) -> Result<Settlement> {
        ctx.flag.ensure_live()?;
        let listing = self.ledger.get(listing_id)?;
        if !listing.is_active() {
            return Err(MarketError::ListingNotActive {
                id: listing_id,
                status: listing.status,
            });
        }
        if listing.is_auction() {
            return Err(MarketError::NotFixedPrice(listing_id));
        }
        if buyer == listing.seller {
            return Err(MarketError::SelfPurchase(listing_id));
        }
        if payment != listing.price {
            return Err(MarketError::WrongAmount {
                expected: listing.price,
                got: payment,
            });
        }
        let settlement = Settlement {
            listing_id,
            token_id: listing.token_id,
            seller: listing.seller,
            counterparty: Some(buyer),
            gross: payment,
            fee: ctx.config.fee_on(payment)?,
            refunded: None,
        };
        self.escrow
            .check_sale(settlement.seller, settlement.gross, settlement.fee)?;

        registry.transfer(settlement.token_id, settlement.seller, buyer)?;
        self.escrow
            .credit_sale(settlement.seller, settlement.gross, settlement.fee)?;
        self.ledger
            .set_status(&self.cap, listing_id, ListingStatus::Sold)?;

        tracing::info!(
            listing = %listing_id,
            token = %settlement.token_id,
            buyer = %buyer,
            price = %settlement.gross,
            fee = %settlement.fee,
            "Listing sold"
        );
        Ok(settlement)
    }

    /// Resolve an ended auction. Permissionless.
    ///
    /// With a winner the token moves seller → winner and the winning lock
    /// becomes seller proceeds plus fee. Without bids nothing moves. If the
    /// seller no longer owns the token, or the operator lost its approval,
    /// the winning bid becomes withdrawable to the bidder instead and the
    /// auction still closes.
    ///
    /// A transfer the registry refuses for any other reason leaves the
    /// auction Active so finalize can be retried.
    ///
    /// # Errors
    /// `SystemPaused`, `ListingNotFound`, `NotAnAuction`, `AlreadyFinalized`,
    /// `ListingNotActive`, `AuctionStillActive`, `AmountOverflow`,
    /// `TokenTransferFailed`.
    pub fn finalize_auction<R: TokenRegistry + ?Sized>(
        &mut self,
        ctx: &CallContext<'_>,
        registry: &mut R,
        listing_id: ListingId,
    ) -> Result<Settlement> {
        ctx.flag.ensure_live()?;
        let listing = self.ledger.get(listing_id)?;
        let Some(auction) = listing.auction() else {
            return Err(MarketError::NotAnAuction(listing_id));
        };
        match listing.status {
            ListingStatus::Finalized => return Err(MarketError::AlreadyFinalized(listing_id)),
            ListingStatus::Active => {}
            status => {
                return Err(MarketError::ListingNotActive {
                    id: listing_id,
                    status,
                });
            }
        }
        if auction.is_open_at(ctx.now) {
            return Err(MarketError::AuctionStillActive {
                ends_at: auction.end_time,
            });
        }

        let mut settlement = Settlement {
            listing_id,
            token_id: listing.token_id,
            seller: listing.seller,
            counterparty: None,
            gross: Decimal::ZERO,
            fee: Decimal::ZERO,
            refunded: None,
        };
        let winning = auction
            .highest_bidder
            .map(|winner| (winner, auction.highest_bid));

        match winning {
            Some((winner, amount))
                if is_deliverable(ctx, &*registry, settlement.token_id, settlement.seller) =>
            {
                let fee = ctx.config.fee_on(amount)?;
                self.escrow
                    .check_settlement(listing_id, winner, amount, settlement.seller, fee)?;
                registry.transfer(settlement.token_id, settlement.seller, winner)?;
                self.escrow
                    .settle_locked(listing_id, winner, amount, settlement.seller, fee)?;
                settlement.counterparty = Some(winner);
                settlement.gross = amount;
                settlement.fee = fee;
            }
            Some((winner, amount)) => {
                self.escrow
                    .release_to_withdrawable(listing_id, winner, amount)?;
                settlement.refunded = Some((winner, amount));
                tracing::warn!(
                    listing = %listing_id,
                    token = %settlement.token_id,
                    seller = %settlement.seller,
                    bidder = %winner,
                    %amount,
                    "Seller cannot deliver; winning bid refunded"
                );
            }
            None => {}
        }
        self.ledger
            .set_status(&self.cap, listing_id, ListingStatus::Finalized)?;

        tracing::info!(
            listing = %listing_id,
            token = %settlement.token_id,
            winner = ?settlement.counterparty,
            amount = %settlement.gross,
            fee = %settlement.fee,
            "Auction finalized"
        );
        Ok(settlement)
    }

    /// Withdraw an Active listing. Seller only; auctions only while unbid.
    ///
    /// # Errors
    /// `SystemPaused`, `ListingNotFound`, `ListingNotActive`, `NotSeller`,
    /// `BidsExist`.
    pub fn cancel_listing(
        &mut self,
        ctx: &CallContext<'_>,
        listing_id: ListingId,
        caller: Address,
    ) -> Result<()> {
        ctx.flag.ensure_live()?;
        let listing = self.ledger.get(listing_id)?;
        if !listing.is_active() {
            return Err(MarketError::ListingNotActive {
                id: listing_id,
                status: listing.status,
            });
        }
        if caller != listing.seller {
            return Err(MarketError::NotSeller {
                id: listing_id,
                caller,
            });
        }
        if listing.auction().is_some_and(AuctionState::has_bids) {
            return Err(MarketError::BidsExist(listing_id));
        }
        self.ledger
            .set_status(&self.cap, listing_id, ListingStatus::Cancelled)?;
        tracing::info!(listing = %listing_id, "Listing cancelled");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    /// Returns the token's Active listing when it belongs to a seller
    /// other than `seller`, who now owns the token.
    fn ensure_listable<R: TokenRegistry + ?Sized>(
        &self,
        ctx: &CallContext<'_>,
        registry: &R,
        token_id: TokenId,
        seller: Address,
    ) -> Result<Option<ListingId>> {
        if registry.owner_of(token_id) != Some(seller) {
            return Err(MarketError::NotTokenOwner {
                token: token_id,
                caller: seller,
            });
        }
        if !registry.is_approved_for_transfer(token_id, ctx.operator) {
            return Err(MarketError::NotApproved(token_id));
        }
        match self.ledger.listing_id_for_token(token_id) {
            None => Ok(None),
            Some(id) if self.ledger.get(id)?.seller == seller => {
                Err(MarketError::AlreadyListed(token_id))
            }
            Some(id) => Ok(Some(id)),
        }
    }

    /// Cancel a listing whose seller no longer owns the token, returning a
    /// locked high bid to its bidder.
    fn retire_stale(&mut self, id: ListingId) -> Result<()> {
        let listing = self.ledger.get(id)?;
        let refund = listing
            .auction()
            .and_then(|a| a.highest_bidder.map(|bidder| (bidder, a.highest_bid)));
        let (token, previous_seller) = (listing.token_id, listing.seller);
        if let Some((bidder, amount)) = refund {
            self.escrow.release_to_withdrawable(id, bidder, amount)?;
        }
        self.ledger
            .set_status(&self.cap, id, ListingStatus::Cancelled)?;
        tracing::warn!(
            listing = %id,
            token = %token,
            seller = %previous_seller,
            refunded = ?refund.map(|(bidder, _)| bidder),
            "Stale listing retired"
        );
        Ok(())
    }
}

/// The seller can hand the token over: still its owner, operator approved.
fn is_deliverable<R: TokenRegistry + ?Sized>(
    ctx: &CallContext<'_>,
    registry: &R,
    token_id: TokenId,
    seller: Address,
) -> bool {
    registry.owner_of(token_id) == Some(seller)
        && registry.is_approved_for_transfer(token_id, ctx.operator)
}

fn ensure_positive_price(price: Decimal) -> Result<()> {
    if price <= Decimal::ZERO {
        return Err(MarketError::InvalidPrice { price });
    }
    ensure_fee_computable(price)
}

/// Refuse amounts whose fee could not be computed at the highest rate the
/// owner may set, so a listing that opens can always settle.
fn ensure_fee_computable(amount: Decimal) -> Result<()> {
    fee_for(amount, constants::MAX_FEE_BPS).map(drop)
}
