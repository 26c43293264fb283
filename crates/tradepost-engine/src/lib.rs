//! # tradepost-engine
//!
//! **Settlement engine** for NFT listings and timed auctions.
//!
//! ## Architecture
//!
//! ```text
//!   call ──▶ Marketplace ──ensure_live──▶ StateMachine ──▶ LedgerStore
//!               │                              │
//!               │                              └──────────▶ EscrowAccount
//!               └──▶ CommitRevealCoordinator ──reveal──▶ StateMachine
//! ```
//!
//! - **LedgerStore**: listing records, monotonic ids, token → active index
//! - **StateMachine**: create / bid / buy / finalize / cancel, sole writer of
//!   the ledger and escrow
//! - **CommitRevealCoordinator**: hash commit, timed wait, reveal into a
//!   fixed-price listing
//! - **AdminControl**: owner, emergency stop, fee rate
//! - **Marketplace**: the call surface; emits a [`tradepost_types::MarketEvent`]
//!   per committed transition
//! - **SharedMarketplace**: `Arc<RwLock<_>>` handle; one writer at a time
//!
//! Collaborators ([`TokenRegistry`], [`Clock`]) are traits supplied by the
//! embedding service.

pub mod admin;
pub mod collaborators;
pub mod commit_reveal;
pub mod events;
pub mod ledger;
pub mod marketplace;
pub mod service;
pub mod snapshot;
pub mod state_machine;

pub use admin::AdminControl;
pub use collaborators::{Clock, InMemoryTokenRegistry, ManualClock, SystemClock, TokenRegistry};
pub use commit_reveal::{CommitRevealCoordinator, RevealRequest};
pub use events::EventLog;
pub use ledger::{LedgerSnapshot, LedgerStore, WriteCapability};
pub use marketplace::{Marketplace, Payout};
pub use service::SharedMarketplace;
pub use snapshot::{MarketSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use state_machine::{BidReceipt, CallContext, Settlement, StateMachine};
