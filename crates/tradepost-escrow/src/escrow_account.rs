//! Escrow account: locked bids, withdrawable balances, protocol fees.
//!
//! Value enters escrow only with a call (a bid or a payment) and leaves
//! only through [`EscrowAccount::withdraw`] or
//! [`EscrowAccount::withdraw_fees`]. In between it moves among three
//! buckets:
//!
//! ```text
//!   bid ──lock──▶ LOCKED(auction, bidder) ──outbid──▶ WITHDRAWABLE(bidder)
//!                        │
//!                        └──settle──▶ WITHDRAWABLE(seller) + PROTOCOL_FEES
//!   payment ──credit_sale──▶ WITHDRAWABLE(seller) + PROTOCOL_FEES
//! ```
//!
//! Every method computes the balances it would leave behind, with checked
//! arithmetic, before it mutates. A failed call, overflow included, leaves
//! the account untouched.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradepost_types::{Address, ListingId, MarketError, Result};

use crate::conservation::{FundsConservation, checked_total};

/// Funds held against one auction on behalf of one bidder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedFunds {
    pub auction: ListingId,
    pub owner: Address,
    pub amount: Decimal,
}

/// Serializable image of an [`EscrowAccount`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSnapshot {
    pub withdrawable: BTreeMap<Address, Decimal>,
    pub locked: Vec<LockedFunds>,
    pub protocol_fees: Decimal,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
}

/// Per-address balances and per-auction locks.
///
/// The account is the source of truth for every unit of value the engine
/// holds. The state machine calls into it; nothing else mutates it.
#[derive(Debug, Default)]
pub struct EscrowAccount {
    /// Withdrawable balance per address (refunds and proceeds).
    withdrawable: BTreeMap<Address, Decimal>,
    /// Active-bid funds per (auction, bidder).
    locked: HashMap<(ListingId, Address), Decimal>,
    /// Accrued platform fees, withdrawable only by the owner.
    protocol_fees: Decimal,
    /// Deposit / withdrawal totals for the conservation check.
    conservation: FundsConservation,
}

impl EscrowAccount {
    /// Create an empty account.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------
    // Inflows
    // -----------------------------------------------------------------

    /// Lock funds that accompanied a bid against `against`.
    ///
    /// # Errors
    /// - `InvariantViolation` for a non-positive amount
    /// - `AmountOverflow` if a running total no longer fits
    pub fn lock(&mut self, address: Address, amount: Decimal, against: ListingId) -> Result<()> {
        ensure_positive("lock", amount)?;
        let mut posting = Posting::new(self);
        posting.deposit(amount)?;
        posting.lock(self, against, address, amount)?;
        self.apply(posting);
        tracing::debug!(auction = %against, bidder = %address, %amount, "Funds locked");
        Ok(())
    }

    /// Take in a new high bid and refund the one it displaces, as one
    /// movement. Either both happen or neither does.
    ///
    /// # Errors
    /// - `InvariantViolation` for a non-positive amount
    /// - `InsufficientLocked` if `outbid` does not match what is locked
    /// - `AmountOverflow` if a running total no longer fits
    pub fn replace_bid(
        &mut self,
        auction: ListingId,
        outbid: Option<(Address, Decimal)>,
        bidder: Address,
        amount: Decimal,
    ) -> Result<()> {
        ensure_positive("lock", amount)?;
        let mut posting = Posting::new(self);
        if let Some((previous, refund)) = outbid {
            posting.unlock(self, auction, previous, refund)?;
            posting.credit(self, previous, refund)?;
        }
        posting.deposit(amount)?;
        posting.lock(self, auction, bidder, amount)?;
        self.apply(posting);
        tracing::debug!(%auction, %bidder, %amount, outbid = outbid.is_some(), "Bid replaced");
        Ok(())
    }

    /// Take in a fixed-price payment: seller gets `gross - fee`, the
    /// protocol gets `fee`.
    ///
    /// # Errors
    /// - `InvariantViolation` if `gross` is non-positive or `fee` falls
    ///   outside `0..=gross`
    /// - `AmountOverflow` if a running total no longer fits
    pub fn credit_sale(&mut self, seller: Address, gross: Decimal, fee: Decimal) -> Result<()> {
        let posting = self.post_sale(seller, gross, fee)?;
        self.apply(posting);
        tracing::debug!(%seller, %gross, %fee, "Sale credited");
        Ok(())
    }

    /// Whether [`credit_sale`](Self::credit_sale) would succeed, without
    /// changing anything.
    ///
    /// # Errors
    /// Whatever `credit_sale` would return.
    pub fn check_sale(&self, seller: Address, gross: Decimal, fee: Decimal) -> Result<()> {
        self.post_sale(seller, gross, fee).map(drop)
    }

    // -----------------------------------------------------------------
    // Internal movements
    // -----------------------------------------------------------------

    /// Move `amount` locked against `auction` for `address` into that
    /// address's withdrawable balance (an outbid refund).
    ///
    /// # Errors
    /// - `InsufficientLocked` if less than `amount` is locked
    /// - `AmountOverflow` if the balance no longer fits
    pub fn release_to_withdrawable(
        &mut self,
        auction: ListingId,
        address: Address,
        amount: Decimal,
    ) -> Result<()> {
        let mut posting = Posting::new(self);
        posting.unlock(self, auction, address, amount)?;
        posting.credit(self, address, amount)?;
        self.apply(posting);
        tracing::debug!(%auction, %address, %amount, "Locked funds released");
        Ok(())
    }

    /// Convert the winner's locked bid into seller proceeds and fee.
    ///
    /// # Errors
    /// - `InsufficientLocked` if less than `amount` is locked for the winner
    /// - `InvariantViolation` if `fee` falls outside `0..=amount`
    /// - `AmountOverflow` if a running total no longer fits
    pub fn settle_locked(
        &mut self,
        auction: ListingId,
        winner: Address,
        amount: Decimal,
        seller: Address,
        fee: Decimal,
    ) -> Result<()> {
        let posting = self.post_settlement(auction, winner, amount, seller, fee)?;
        self.apply(posting);
        tracing::debug!(%auction, %winner, %seller, %amount, %fee, "Locked funds settled");
        Ok(())
    }

    /// Whether [`settle_locked`](Self::settle_locked) would succeed,
    /// without changing anything.
    ///
    /// # Errors
    /// Whatever `settle_locked` would return.
    pub fn check_settlement(
        &self,
        auction: ListingId,
        winner: Address,
        amount: Decimal,
        seller: Address,
        fee: Decimal,
    ) -> Result<()> {
        self.post_settlement(auction, winner, amount, seller, fee)
            .map(drop)
    }

    // -----------------------------------------------------------------
    // Outflows
    // -----------------------------------------------------------------

    /// Zero `address`'s withdrawable balance and return what it held.
    ///
    /// The ledger entry is cleared **before** the amount is handed back,
    /// so the caller performs the actual transfer only after escrow no
    /// longer owes it. Calling again returns `NothingToWithdraw`.
    ///
    /// # Errors
    /// - `NothingToWithdraw` if the balance is zero
    /// - `AmountOverflow` if the withdrawal total no longer fits
    pub fn withdraw(&mut self, address: Address) -> Result<Decimal> {
        let amount = self.balance_of(address);
        if amount <= Decimal::ZERO {
            return Err(MarketError::NothingToWithdraw(address));
        }
        let mut posting = Posting::new(self);
        posting.withdrawal(amount)?;
        posting.withdrawable.insert(address, Decimal::ZERO);
        self.apply(posting);
        tracing::debug!(%address, %amount, "Withdrawable balance zeroed");
        Ok(amount)
    }

    /// Zero the protocol-fee balance and return what it held (may be zero).
    ///
    /// # Errors
    /// `AmountOverflow` if the withdrawal total no longer fits.
    pub fn withdraw_fees(&mut self) -> Result<Decimal> {
        let amount = self.protocol_fees;
        let mut posting = Posting::new(self);
        posting.withdrawal(amount)?;
        posting.protocol_fees = Decimal::ZERO;
        self.apply(posting);
        Ok(amount)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Withdrawable balance of `address`.
    #[must_use]
    pub fn balance_of(&self, address: Address) -> Decimal {
        self.withdrawable
            .get(&address)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Amount locked for `address` against `auction`.
    #[must_use]
    pub fn locked_amount(&self, auction: ListingId, address: Address) -> Decimal {
        self.locked
            .get(&(auction, address))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Everything locked against `auction`, across bidders.
    #[must_use]
    pub fn locked_against(&self, auction: ListingId) -> Decimal {
        self.locked
            .iter()
            .filter(|((a, _), _)| *a == auction)
            .map(|(_, amount)| *amount)
            .sum()
    }

    #[must_use]
    pub fn total_locked(&self) -> Decimal {
        self.locked.values().copied().sum()
    }

    #[must_use]
    pub fn total_withdrawable(&self) -> Decimal {
        self.withdrawable.values().copied().sum()
    }

    #[must_use]
    pub fn protocol_fees(&self) -> Decimal {
        self.protocol_fees
    }

    /// Everything escrow currently holds.
    #[must_use]
    pub fn total_held(&self) -> Decimal {
        self.total_withdrawable() + self.total_locked() + self.protocol_fees
    }

    #[must_use]
    pub fn conservation(&self) -> &FundsConservation {
        &self.conservation
    }

    /// Check `Σ withdrawable + Σ locked + fees == deposited - withdrawn`.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if the identity does not hold.
    pub fn verify_conservation(&self) -> Result<()> {
        let held = self
            .withdrawable
            .values()
            .chain(self.locked.values())
            .chain(std::iter::once(&self.protocol_fees))
            .try_fold(Decimal::ZERO, |acc, v| checked_total(acc, *v, "escrow holdings"))?;
        self.conservation.verify(held)
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> EscrowSnapshot {
        let mut locked: Vec<LockedFunds> = self
            .locked
            .iter()
            .map(|((auction, owner), amount)| LockedFunds {
                auction: *auction,
                owner: *owner,
                amount: *amount,
            })
            .collect();
        locked.sort_by(|a, b| a.auction.cmp(&b.auction).then(a.owner.cmp(&b.owner)));
        EscrowSnapshot {
            withdrawable: self.withdrawable.clone(),
            locked,
            protocol_fees: self.protocol_fees,
            total_deposited: self.conservation.total_deposited(),
            total_withdrawn: self.conservation.total_withdrawn(),
        }
    }

    /// Rebuild an account from a snapshot, refusing one that does not
    /// conserve funds.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if the snapshot is inconsistent or
    /// carries a negative amount.
    pub fn from_snapshot(snapshot: EscrowSnapshot) -> Result<Self> {
        let negative = snapshot
            .withdrawable
            .values()
            .chain(snapshot.locked.iter().map(|l| &l.amount))
            .chain([
                &snapshot.protocol_fees,
                &snapshot.total_deposited,
                &snapshot.total_withdrawn,
            ])
            .find(|v| v.is_sign_negative());
        if let Some(negative) = negative {
            return Err(MarketError::InvariantViolation {
                reason: format!("negative amount {negative} in snapshot"),
            });
        }

        let mut locked = HashMap::with_capacity(snapshot.locked.len());
        for entry in snapshot.locked {
            if locked
                .insert((entry.auction, entry.owner), entry.amount)
                .is_some()
            {
                return Err(MarketError::InvariantViolation {
                    reason: format!(
                        "duplicate lock for {} on {} in snapshot",
                        entry.owner, entry.auction
                    ),
                });
            }
        }
        let account = Self {
            withdrawable: snapshot.withdrawable,
            locked,
            protocol_fees: snapshot.protocol_fees,
            conservation: FundsConservation::from_totals(
                snapshot.total_deposited,
                snapshot.total_withdrawn,
            ),
        };
        account.verify_conservation()?;
        Ok(account)
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    fn post_sale(&self, seller: Address, gross: Decimal, fee: Decimal) -> Result<Posting> {
        ensure_positive("sale", gross)?;
        ensure_fee_within(gross, fee)?;
        let mut posting = Posting::new(self);
        posting.deposit(gross)?;
        posting.credit(self, seller, gross - fee)?;
        posting.add_fee(fee)?;
        Ok(posting)
    }

    fn post_settlement(
        &self,
        auction: ListingId,
        winner: Address,
        amount: Decimal,
        seller: Address,
        fee: Decimal,
    ) -> Result<Posting> {
        ensure_fee_within(amount, fee)?;
        let mut posting = Posting::new(self);
        posting.unlock(self, auction, winner, amount)?;
        posting.credit(self, seller, amount - fee)?;
        posting.add_fee(fee)?;
        Ok(posting)
    }

    /// Write a fully computed posting back. Cannot fail.
    fn apply(&mut self, posting: Posting) {
        self.conservation = posting.conservation;
        self.protocol_fees = posting.protocol_fees;
        for (address, amount) in posting.withdrawable {
            if amount.is_zero() {
                self.withdrawable.remove(&address);
            } else {
                self.withdrawable.insert(address, amount);
            }
        }
        for (key, amount) in posting.locked {
            if amount.is_zero() {
                self.locked.remove(&key);
            } else {
                self.locked.insert(key, amount);
            }
        }
    }
}

/// The balances one movement would leave behind. Built with checked
/// arithmetic against the current account, then applied in one step.
struct Posting {
    conservation: FundsConservation,
    protocol_fees: Decimal,
    withdrawable: BTreeMap<Address, Decimal>,
    locked: BTreeMap<(ListingId, Address), Decimal>,
}

impl Posting {
    fn new(base: &EscrowAccount) -> Self {
        Self {
            conservation: base.conservation.clone(),
            protocol_fees: base.protocol_fees,
            withdrawable: BTreeMap::new(),
            locked: BTreeMap::new(),
        }
    }

    fn deposit(&mut self, amount: Decimal) -> Result<()> {
        self.conservation.record_deposit(amount)
    }

    fn withdrawal(&mut self, amount: Decimal) -> Result<()> {
        self.conservation.record_withdrawal(amount)
    }

    fn add_fee(&mut self, fee: Decimal) -> Result<()> {
        self.protocol_fees = checked_total(self.protocol_fees, fee, "protocol fees")?;
        Ok(())
    }

    fn credit(&mut self, base: &EscrowAccount, address: Address, amount: Decimal) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let current = self
            .withdrawable
            .get(&address)
            .copied()
            .unwrap_or_else(|| base.balance_of(address));
        let next = checked_total(current, amount, "withdrawable balance")?;
        self.withdrawable.insert(address, next);
        Ok(())
    }

    fn lock(
        &mut self,
        base: &EscrowAccount,
        auction: ListingId,
        address: Address,
        amount: Decimal,
    ) -> Result<()> {
        let current = self.locked_amount(base, auction, address);
        let next = checked_total(current, amount, "locked bid")?;
        self.locked.insert((auction, address), next);
        Ok(())
    }

    fn unlock(
        &mut self,
        base: &EscrowAccount,
        auction: ListingId,
        address: Address,
        amount: Decimal,
    ) -> Result<()> {
        let locked = self.locked_amount(base, auction, address);
        if amount <= Decimal::ZERO || locked < amount {
            return Err(MarketError::InsufficientLocked {
                auction,
                needed: amount,
                locked,
            });
        }
        self.locked.insert((auction, address), locked - amount);
        Ok(())
    }

    fn locked_amount(&self, base: &EscrowAccount, auction: ListingId, address: Address) -> Decimal {
        self.locked
            .get(&(auction, address))
            .copied()
            .unwrap_or_else(|| base.locked_amount(auction, address))
    }
}

fn ensure_positive(what: &str, amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(MarketError::InvariantViolation {
            reason: format!("{what} amount must be positive, got {amount}"),
        });
    }
    Ok(())
}

fn ensure_fee_within(gross: Decimal, fee: Decimal) -> Result<()> {
    if fee.is_sign_negative() || fee > gross {
        return Err(MarketError::InvariantViolation {
            reason: format!("fee {fee} outside 0..={gross}"),
        });
    }
    Ok(())
}
