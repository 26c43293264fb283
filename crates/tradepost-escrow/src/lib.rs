//! # tradepost-escrow
//!
//! **Escrow plane**: every unit of value the engine holds, and the proof
//! that none is created or lost.
//!
//! ## Architecture
//!
//! - **EscrowAccount**: locked bids per (auction, bidder), withdrawable
//!   balances per address, and the protocol-fee balance
//! - **FundsConservation**: independent deposit / withdrawal totals used to
//!   verify `Σ held == Σ deposited - Σ withdrawn` after every movement
//!
//! ## Withdraw Ordering
//!
//! Withdrawals zero the ledger entry first and only then hand the amount
//! back for transfer. A transfer that happened before zeroing would let a
//! re-entrant caller withdraw the same balance twice.

pub mod conservation;
pub mod escrow_account;

pub use conservation::FundsConservation;
pub use escrow_account::{EscrowAccount, EscrowSnapshot, LockedFunds};
