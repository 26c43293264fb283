//! # tradepost-types
//!
//! Shared types, errors, and configuration for the **Tradepost** settlement
//! engine.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`ListingId`], [`TokenId`], [`Address`], [`EventId`]
//! - **Listing model**: [`Listing`], [`ListingKind`], [`ListingStatus`], [`AuctionState`]
//! - **Commitment model**: [`Commitment`], [`CommitmentHash`], [`Salt`]
//! - **Admin model**: [`SystemFlag`]
//! - **Events**: [`MarketEvent`], [`EventRecord`]
//! - **Configuration**: [`MarketConfig`]
//! - **Errors**: [`MarketError`] with `TP_ERR_` prefix codes, [`ErrorClass`]
//! - **Constants**: system-wide limits and defaults

pub mod commitment;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod flag;
pub mod ids;
pub mod listing;

pub use commitment::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use flag::*;
pub use ids::*;
pub use listing::*;

// Constants are accessed via `tradepost_types::constants::FOO`
// (not re-exported to avoid name collisions).
