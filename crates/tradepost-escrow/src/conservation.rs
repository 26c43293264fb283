//! Funds conservation invariant checker.
//!
//! Mathematical invariant enforced after every fund movement:
//! ```text
//! Σ withdrawable + Σ locked + protocol_fees == Σ deposits - Σ withdrawals
//! ```
//!
//! If this invariant ever breaks, the operation is refused with
//! [`MarketError::InvariantViolation`]. It is never silently corrected.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradepost_types::{MarketError, Result};

/// Tracks value entering and leaving escrow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsConservation {
    /// Total value that ever accompanied a call (bids, payments).
    deposited: Decimal,
    /// Total value ever paid out (withdrawals, fee withdrawals).
    withdrawn: Decimal,
}

impl FundsConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted totals.
    #[must_use]
    pub fn from_totals(deposited: Decimal, withdrawn: Decimal) -> Self {
        Self {
            deposited,
            withdrawn,
        }
    }

    /// # Errors
    /// [`MarketError::AmountOverflow`] if the running total no longer fits.
    pub fn record_deposit(&mut self, amount: Decimal) -> Result<()> {
        self.deposited = checked_total(self.deposited, amount, "total deposited")?;
        Ok(())
    }

    /// # Errors
    /// [`MarketError::AmountOverflow`] if the running total no longer fits.
    pub fn record_withdrawal(&mut self, amount: Decimal) -> Result<()> {
        self.withdrawn = checked_total(self.withdrawn, amount, "total withdrawn")?;
        Ok(())
    }

    /// Value escrow should currently hold: deposits - withdrawals.
    #[must_use]
    pub fn expected_held(&self) -> Decimal {
        self.deposited - self.withdrawn
    }

    #[must_use]
    pub fn total_deposited(&self) -> Decimal {
        self.deposited
    }

    #[must_use]
    pub fn total_withdrawn(&self) -> Decimal {
        self.withdrawn
    }

    /// Verify that what escrow actually holds matches the ledger of flows.
    ///
    /// # Errors
    /// Returns [`MarketError::InvariantViolation`] if actual ≠ expected.
    pub fn verify(&self, actual_held: Decimal) -> Result<()> {
        let expected = self.expected_held();
        if actual_held != expected {
            return Err(MarketError::InvariantViolation {
                reason: format!(
                    "escrow holds {actual_held} but expected {expected} \
                     (deposited={}, withdrawn={})",
                    self.deposited, self.withdrawn
                ),
            });
        }
        Ok(())
    }
}

/// `total + amount`, or [`MarketError::AmountOverflow`] naming `what`.
pub(crate) fn checked_total(total: Decimal, amount: Decimal, what: &str) -> Result<Decimal> {
    total
        .checked_add(amount)
        .ok_or_else(|| MarketError::AmountOverflow {
            what: format!("{what}: {total} + {amount}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        let fc = FundsConservation::new();
        assert_eq!(fc.expected_held(), Decimal::ZERO);
        assert!(fc.verify(Decimal::ZERO).is_ok());
    }

    #[test]
    fn deposits_and_withdrawals() {
        let mut fc = FundsConservation::new();
        fc.record_deposit(Decimal::new(3, 2)).unwrap();
        fc.record_deposit(Decimal::new(2, 2)).unwrap();
        fc.record_withdrawal(Decimal::new(1, 2)).unwrap();
        assert_eq!(fc.expected_held(), Decimal::new(4, 2));
        assert_eq!(fc.total_deposited(), Decimal::new(5, 2));
        assert_eq!(fc.total_withdrawn(), Decimal::new(1, 2));
        assert!(fc.verify(Decimal::new(4, 2)).is_ok());
    }

    #[test]
    fn imbalance_is_invariant_violation() {
        let mut fc = FundsConservation::new();
        fc.record_deposit(Decimal::ONE).unwrap();
        let err = fc.verify(Decimal::TWO).unwrap_err();
        assert!(matches!(err, MarketError::InvariantViolation { .. }));
    }

    #[test]
    fn from_totals_restores() {
        let fc = FundsConservation::from_totals(Decimal::TEN, Decimal::ONE);
        assert_eq!(fc.expected_held(), Decimal::new(9, 0));
    }

    #[test]
    fn overflowing_deposit_leaves_totals() {
        let mut fc = FundsConservation::new();
        fc.record_deposit(Decimal::MAX).unwrap();
        let err = fc.record_deposit(Decimal::ONE).unwrap_err();
        assert!(matches!(err, MarketError::AmountOverflow { .. }));
        assert_eq!(fc.total_deposited(), Decimal::MAX);
    }
}
