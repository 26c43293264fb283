//! The system flag record: owner identity and emergency stop.
//!
//! The flag is passed by reference into every mutating call instead of
//! living in ambient global state.

use serde::{Deserialize, Serialize};

use crate::{Address, MarketError, Result};

/// Owner and emergency-stop state, set at initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFlag {
    pub emergency_stop: bool,
    pub owner: Address,
}

impl SystemFlag {
    /// A live (not paused) system owned by `owner`.
    #[must_use]
    pub fn new(owner: Address) -> Self {
        Self {
            emergency_stop: false,
            owner,
        }
    }

    /// Gate for every mutating operation.
    ///
    /// # Errors
    /// Returns [`MarketError::SystemPaused`] while the emergency stop is set.
    pub fn ensure_live(&self) -> Result<()> {
        if self.emergency_stop {
            return Err(MarketError::SystemPaused);
        }
        Ok(())
    }

    /// Gate for owner-only operations.
    ///
    /// # Errors
    /// Returns [`MarketError::NotOwner`] for any other caller.
    pub fn ensure_owner(&self, caller: Address) -> Result<()> {
        if caller != self.owner {
            return Err(MarketError::NotOwner(caller));
        }
        Ok(())
    }
}
