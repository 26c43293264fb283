//! Configuration types for a Tradepost marketplace.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{constants, MarketError, Result};

/// Fee and timing configuration.
///
/// All windows are whole seconds so the JSON form stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Platform fee in basis points, applied at buy and finalize.
    pub fee_bps: u32,
    /// Shortest allowed auction.
    pub min_auction_secs: i64,
    /// Longest allowed auction.
    pub max_auction_secs: i64,
    /// Wait between commit and the earliest reveal.
    pub reveal_wait_secs: i64,
    /// How long after the wait window a reveal is still accepted.
    pub reveal_grace_secs: i64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            fee_bps: constants::DEFAULT_FEE_BPS,
            min_auction_secs: constants::DEFAULT_MIN_AUCTION_SECS,
            max_auction_secs: constants::DEFAULT_MAX_AUCTION_SECS,
            reveal_wait_secs: constants::DEFAULT_REVEAL_WAIT_SECS,
            reveal_grace_secs: constants::DEFAULT_REVEAL_GRACE_SECS,
        }
    }
}

impl MarketConfig {
    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        validate_fee_bps(self.fee_bps)?;
        for (name, secs) in [
            ("min_auction_secs", self.min_auction_secs),
            ("max_auction_secs", self.max_auction_secs),
            ("reveal_wait_secs", self.reveal_wait_secs),
        ] {
            if secs <= 0 || secs > constants::MAX_CONFIG_WINDOW_SECS {
                return Err(MarketError::Configuration(format!(
                    "{name} must be in 1..={}, got {secs}",
                    constants::MAX_CONFIG_WINDOW_SECS
                )));
            }
        }
        if self.reveal_grace_secs < 0
            || self.reveal_grace_secs > constants::MAX_CONFIG_WINDOW_SECS
        {
            return Err(MarketError::Configuration(format!(
                "reveal_grace_secs must be in 0..={}, got {}",
                constants::MAX_CONFIG_WINDOW_SECS,
                self.reveal_grace_secs
            )));
        }
        if self.min_auction_secs > self.max_auction_secs {
            return Err(MarketError::Configuration(format!(
                "min_auction_secs {} exceeds max_auction_secs {}",
                self.min_auction_secs, self.max_auction_secs
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| MarketError::Configuration(format!("bad config json: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[must_use]
    pub fn min_auction(&self) -> Duration {
        Duration::seconds(self.min_auction_secs)
    }

    #[must_use]
    pub fn max_auction(&self) -> Duration {
        Duration::seconds(self.max_auction_secs)
    }

    #[must_use]
    pub fn reveal_wait(&self) -> Duration {
        Duration::seconds(self.reveal_wait_secs)
    }

    #[must_use]
    pub fn reveal_grace(&self) -> Duration {
        Duration::seconds(self.reveal_grace_secs)
    }

    /// Fee owed on a gross amount at the configured rate.
    ///
    /// # Errors
    /// See [`fee_for`].
    pub fn fee_on(&self, gross: Decimal) -> Result<Decimal> {
        fee_for(gross, self.fee_bps)
    }
}

/// Fee owed on `gross` at `bps` basis points. Exact decimal arithmetic.
///
/// # Errors
/// [`MarketError::AmountOverflow`] if `gross * bps` does not fit.
pub fn fee_for(gross: Decimal, bps: u32) -> Result<Decimal> {
    gross
        .checked_mul(Decimal::from(bps))
        .and_then(|scaled| scaled.checked_div(Decimal::from(constants::BPS_DENOMINATOR)))
        .ok_or_else(|| MarketError::AmountOverflow {
            what: format!("fee on {gross} at {bps} bps"),
        })
}

/// Fee rates above [`constants::MAX_FEE_BPS`] are refused.
pub fn validate_fee_bps(bps: u32) -> Result<()> {
    if bps > constants::MAX_FEE_BPS {
        return Err(MarketError::InvalidFeeRate {
            bps,
            max_bps: constants::MAX_FEE_BPS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = MarketConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.fee_bps, 250);
        assert_eq!(cfg.min_auction(), Duration::hours(1));
        assert_eq!(cfg.max_auction(), Duration::days(7));
        assert_eq!(cfg.reveal_wait(), Duration::minutes(5));
    }

    #[test]
    fn fee_is_exact() {
        let cfg = MarketConfig::default();
        // 0.1 * 2.5% = 0.0025
        assert_eq!(cfg.fee_on(Decimal::new(1, 1)).unwrap(), Decimal::new(25, 4));
        assert_eq!(fee_for(Decimal::new(3, 2), 0).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn fee_overflow_is_typed() {
        let err = fee_for(Decimal::MAX, constants::MAX_FEE_BPS).unwrap_err();
        assert!(matches!(err, MarketError::AmountOverflow { .. }));
        assert_eq!(fee_for(Decimal::MAX, 0).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn rejects_fee_above_cap() {
        let cfg = MarketConfig {
            fee_bps: 1_001,
            ..MarketConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(MarketError::InvalidFeeRate { bps: 1_001, .. })
        ));
    }

    #[test]
    fn rejects_inverted_auction_bounds() {
        let cfg = MarketConfig {
            min_auction_secs: 100,
            max_auction_secs: 10,
            ..MarketConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(MarketError::Configuration(_))));
    }

    #[test]
    fn rejects_non_positive_wait() {
        let cfg = MarketConfig {
            reveal_wait_secs: 0,
            ..MarketConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(MarketError::Configuration(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = MarketConfig::from_json(r#"{ "fee_bps": 500 }"#).unwrap();
        assert_eq!(cfg.fee_bps, 500);
        assert_eq!(cfg.reveal_wait_secs, constants::DEFAULT_REVEAL_WAIT_SECS);
    }

    #[test]
    fn bad_json_is_configuration_error() {
        let err = MarketConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, MarketError::Configuration(_)));
    }
}
