//! Admin control surface: owner identity, emergency stop, fee rate.
//!
//! Owner-only setters stay callable while the system is paused so the owner
//! can always lift the stop or fix the fee.

use chrono::{DateTime, Utc};
use tradepost_types::{Address, MarketConfig, MarketError, Result, SystemFlag, config};

use crate::state_machine::CallContext;

/// Holds the [`SystemFlag`] and the live [`MarketConfig`].
#[derive(Debug, Clone)]
pub struct AdminControl {
    flag: SystemFlag,
    config: MarketConfig,
}

impl AdminControl {
    /// # Errors
    /// Returns `Configuration`/`InvalidFeeRate` for an unusable config and
    /// `InvalidAddress` for the zero owner.
    pub fn new(owner: Address, config: MarketConfig) -> Result<Self> {
        config.validate()?;
        ensure_non_zero(owner)?;
        Ok(Self {
            flag: SystemFlag::new(owner),
            config,
        })
    }

    /// Rebuild from persisted parts.
    ///
    /// # Errors
    /// Same as [`AdminControl::new`]: a persisted config or owner that
    /// would be refused at construction is refused here too.
    pub fn from_parts(flag: SystemFlag, config: MarketConfig) -> Result<Self> {
        config.validate()?;
        ensure_non_zero(flag.owner)?;
        Ok(Self { flag, config })
    }

    #[must_use]
    pub fn flag(&self) -> &SystemFlag {
        &self.flag
    }

    #[must_use]
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Context for one state-machine call at `now`.
    #[must_use]
    pub fn context(&self, now: DateTime<Utc>, operator: Address) -> CallContext<'_> {
        CallContext {
            flag: &self.flag,
            config: &self.config,
            now,
            operator,
        }
    }

    #[must_use]
    pub fn owner(&self) -> Address {
        self.flag.owner
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.emergency_stop
    }

    /// Set (or clear) the emergency stop. Returns whether the value changed.
    ///
    /// # Errors
    /// Returns `NotOwner` for any caller but the owner.
    pub fn set_emergency_stop(&mut self, caller: Address, stopped: bool) -> Result<bool> {
        self.flag.ensure_owner(caller)?;
        let changed = self.flag.emergency_stop != stopped;
        self.flag.emergency_stop = stopped;
        Ok(changed)
    }

    /// # Errors
    /// `NotOwner`, or `InvalidFeeRate` above the ceiling.
    pub fn set_fee_rate(&mut self, caller: Address, fee_bps: u32) -> Result<()> {
        self.flag.ensure_owner(caller)?;
        config::validate_fee_bps(fee_bps)?;
        self.config.fee_bps = fee_bps;
        Ok(())
    }

    /// Hand ownership to `new_owner`. Returns the previous owner.
    ///
    /// # Errors
    /// `NotOwner`, or `InvalidAddress` for the zero address.
    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> Result<Address> {
        self.flag.ensure_owner(caller)?;
        ensure_non_zero(new_owner)?;
        let previous = std::mem::replace(&mut self.flag.owner, new_owner);
        Ok(previous)
    }
}

fn ensure_non_zero(owner: Address) -> Result<()> {
    if owner.is_zero() {
        return Err(MarketError::InvalidAddress {
            reason: "owner cannot be the zero address".into(),
        });
    }
    Ok(())
}
