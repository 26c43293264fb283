//! External collaborators the engine talks to but does not own.
//!
//! The token registry is the authority on NFT ownership and approvals; the
//! clock is the only source of "now". Both are traits so the embedding
//! service can plug in a chain-backed registry and wall time, while tests
//! use [`InMemoryTokenRegistry`] and [`ManualClock`].

mod clock;
mod registry;

use chrono::{DateTime, Utc};
use tradepost_types::{Address, Result, TokenId};

pub use clock::{ManualClock, SystemClock};
pub use registry::InMemoryTokenRegistry;

/// NFT ownership and transfer authority.
pub trait TokenRegistry {
    /// Current owner of `token_id`, or `None` if it does not exist.
    fn owner_of(&self, token_id: TokenId) -> Option<Address>;

    /// Whether `operator` may move `token_id` on the owner's behalf.
    fn is_approved_for_transfer(&self, token_id: TokenId, operator: Address) -> bool;

    /// Move `token_id` from `from` to `to`.
    ///
    /// # Errors
    /// Returns `TokenTransferFailed` if the registry refuses.
    fn transfer(&mut self, token_id: TokenId, from: Address, to: Address) -> Result<()>;
}

/// Source of the current instant. Expiry is evaluated lazily against it.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}
