//! Executes a [`Script`] against an in-memory marketplace.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tradepost_engine::{Clock, InMemoryTokenRegistry, ManualClock, Marketplace, TokenRegistry};
use tradepost_types::{CommitmentHash, MarketConfig, MarketError};

use crate::script::{Action, Script, Step};

/// Result of one step as printed to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub op: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Names of the events the step emitted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok { result: Value },
    /// Failed with the error the step declared.
    Rejected { error: String },
    /// Anything the script did not anticipate.
    Failed { error: String },
}

impl StepReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

enum StepError {
    Market(MarketError),
    Check(String),
}

impl From<MarketError> for StepError {
    fn from(err: MarketError) -> Self {
        Self::Market(err)
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market(e) => write!(f, "{e}"),
            Self::Check(msg) => write!(f, "check failed: {msg}"),
        }
    }
}

pub struct Runner {
    market: Marketplace<InMemoryTokenRegistry, ManualClock>,
    clock: ManualClock,
}

impl Runner {
    pub fn new(script: &Script, config: MarketConfig) -> tradepost_types::Result<Self> {
        let clock = ManualClock::new(script.start.unwrap_or_else(Utc::now));
        let market = Marketplace::new(
            script.owner,
            script.operator,
            config,
            InMemoryTokenRegistry::new(),
            clock.clone(),
        )?;
        Ok(Self { market, clock })
    }

    pub fn market(&self) -> &Marketplace<InMemoryTokenRegistry, ManualClock> {
        &self.market
    }

    /// Run every step in order. Failures are reported, not fatal.
    pub fn run_all(&mut self, steps: &[Step]) -> Vec<StepReport> {
        steps
            .iter()
            .enumerate()
            .map(|(i, step)| self.run_step(i + 1, step))
            .collect()
    }

    pub fn run_step(&mut self, index: usize, step: &Step) -> StepReport {
        let op = step.action.name();
        let result = self.execute(&step.action);
        let events = self
            .market
            .drain_events()
            .iter()
            .map(|r| r.event.name())
            .collect();

        let outcome = match (result, step.expect_error.as_deref()) {
            (Ok(result), None) => Outcome::Ok { result },
            (Ok(_), Some(code)) => Outcome::Failed {
                error: format!("expected {code} but the call succeeded"),
            },
            (Err(StepError::Market(e)), Some(code)) if e.to_string().starts_with(code) => {
                Outcome::Rejected {
                    error: e.to_string(),
                }
            }
            (Err(e), _) => Outcome::Failed {
                error: e.to_string(),
            },
        };
        if let Outcome::Failed { error } = &outcome {
            tracing::warn!(step = index, op, %error, "Step failed");
        }
        StepReport {
            step: index,
            op,
            outcome,
            events,
        }
    }

    fn execute(&mut self, action: &Action) -> Result<Value, StepError> {
        let m = &mut self.market;
        let operator = m.operator();
        let value = match action {
            Action::Mint { token, to } => {
                m.registry_mut().mint(*token, *to)?;
                Value::Null
            }
            Action::Approve { owner, token } => {
                m.registry_mut().approve(*owner, *token, operator)?;
                Value::Null
            }
            Action::ApproveAll { owner, approved } => {
                m.registry_mut()
                    .set_approval_for_all(*owner, operator, *approved);
                Value::Null
            }
            Action::Advance { secs } => {
                self.clock.advance(Duration::seconds(*secs));
                json!({ "now": self.clock.now() })
            }
            Action::CreateListing {
                seller,
                token,
                price,
            } => json!({ "listing_id": m.create_listing(*seller, *token, *price)? }),
            Action::CreateAuction {
                seller,
                token,
                starting_price,
                duration_secs,
            } => {
                let id = m.create_auction(
                    *seller,
                    *token,
                    *starting_price,
                    Duration::seconds(*duration_secs),
                )?;
                json!({ "listing_id": id })
            }
            Action::Bid {
                bidder,
                listing,
                amount,
            } => to_value(&m.place_bid(*bidder, *listing, *amount)?),
            Action::Buy {
                buyer,
                listing,
                payment,
            } => to_value(&m.buy_listing(*buyer, *listing, *payment)?),
            Action::Finalize { listing } => to_value(&m.finalize_auction(*listing)?),
            Action::Cancel { caller, listing } => {
                m.cancel_listing(*caller, *listing)?;
                Value::Null
            }
            Action::Commit {
                committer,
                token,
                price,
                salt,
            } => {
                let hash = CommitmentHash::compute(*token, *price, salt, *committer);
                m.commit(*committer, hash)?;
                json!({ "hash": hash.to_hex() })
            }
            Action::CommitHash { committer, hash } => {
                m.commit(*committer, *hash)?;
                json!({ "hash": hash.to_hex() })
            }
            Action::Reveal {
                committer,
                token,
                price,
                salt,
            } => json!({ "listing_id": m.reveal(*committer, *token, *price, *salt)? }),
            Action::Invalidate { committer } => {
                m.invalidate_expired(*committer)?;
                Value::Null
            }
            Action::Withdraw { caller } => to_value(&m.withdraw(*caller)?),
            Action::WithdrawFees { caller } => to_value(&m.withdraw_fees(*caller)?),
            Action::SetEmergencyStop { caller, stopped } => {
                m.set_emergency_stop(*caller, *stopped)?;
                json!({ "emergency_stop": m.emergency_stop() })
            }
            Action::SetFeeRate { caller, fee_bps } => {
                m.set_fee_rate(*caller, *fee_bps)?;
                json!({ "fee_bps": m.config().fee_bps })
            }
            Action::TransferOwnership { caller, new_owner } => {
                m.transfer_ownership(*caller, *new_owner)?;
                json!({ "owner": m.owner() })
            }
            Action::ExpectBalance { address, amount } => {
                let actual = m.balance_of(*address);
                if actual != *amount {
                    return Err(StepError::Check(format!(
                        "balance of {address} is {actual}, expected {amount}"
                    )));
                }
                json!({ "balance": actual })
            }
            Action::ExpectFees { amount } => {
                let actual = m.protocol_fees();
                if actual != *amount {
                    return Err(StepError::Check(format!(
                        "protocol fees are {actual}, expected {amount}"
                    )));
                }
                json!({ "protocol_fees": actual })
            }
            Action::ExpectOwner { token, owner } => {
                let actual = m.registry().owner_of(*token);
                if actual != Some(*owner) {
                    return Err(StepError::Check(format!(
                        "token {token} is owned by {actual:?}, expected {owner}"
                    )));
                }
                json!({ "owner": owner })
            }
        };
        Ok(value)
    }
}

fn to_value<T: Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use tradepost_types::{Address, ListingId, TokenId};

    use super::*;

    const OWNER: Address = Address([0xaa; 20]);
    const OPERATOR: Address = Address([0xee; 20]);
    const SELLER: Address = Address([0x01; 20]);
    const ALICE: Address = Address([0x0a; 20]);
    const BOB: Address = Address([0x0b; 20]);

    fn step(action: Action) -> Step {
        Step {
            action,
            expect_error: None,
        }
    }

    fn expecting(action: Action, code: &str) -> Step {
        Step {
            action,
            expect_error: Some(code.to_string()),
        }
    }

    fn runner(steps: Vec<Step>) -> (Runner, Vec<Step>) {
        let script = Script {
            owner: OWNER,
            operator: OPERATOR,
            start: None,
            steps,
        };
        let runner = Runner::new(&script, MarketConfig::default()).unwrap();
        (runner, script.steps)
    }

    #[test]
    fn auction_scenario_runs_clean() {
        let (mut r, steps) = runner(vec![
            step(Action::Mint {
                token: TokenId(1),
                to: SELLER,
            }),
            step(Action::ApproveAll {
                owner: SELLER,
                approved: true,
            }),
            step(Action::CreateAuction {
                seller: SELLER,
                token: TokenId(1),
                starting_price: Decimal::new(1, 2),
                duration_secs: 3600,
            }),
            step(Action::Bid {
                bidder: ALICE,
                listing: ListingId(1),
                amount: Decimal::new(2, 2),
            }),
            step(Action::Bid {
                bidder: BOB,
                listing: ListingId(1),
                amount: Decimal::new(3, 2),
            }),
            expecting(
                Action::Finalize {
                    listing: ListingId(1),
                },
                "TP_ERR_204",
            ),
            step(Action::Advance { secs: 3600 }),
            step(Action::Finalize {
                listing: ListingId(1),
            }),
            step(Action::ExpectOwner {
                token: TokenId(1),
                owner: BOB,
            }),
            step(Action::ExpectBalance {
                address: ALICE,
                amount: Decimal::new(2, 2),
            }),
            step(Action::ExpectBalance {
                address: SELLER,
                amount: Decimal::new(2925, 5),
            }),
        ]);
        let reports = r.run_all(&steps);
        assert!(reports.iter().all(|s| !s.is_failure()), "{reports:#?}");
        assert!(matches!(reports[5].outcome, Outcome::Rejected { .. }));
        assert_eq!(reports[4].events, vec!["BID_PLACED"]);
        r.market().verify_invariants().unwrap();
    }

    #[test]
    fn unexpected_success_and_failed_checks_are_failures() {
        let (mut r, steps) = runner(vec![
            expecting(
                Action::Mint {
                    token: TokenId(1),
                    to: SELLER,
                },
                "TP_ERR_600",
            ),
            step(Action::ExpectFees {
                amount: Decimal::ONE,
            }),
            step(Action::Withdraw { caller: ALICE }),
        ]);
        let reports = r.run_all(&steps);
        assert!(reports.iter().all(StepReport::is_failure));
    }

    #[test]
    fn commit_then_reveal_after_wait() {
        let salt = [7u8; 32];
        let (mut r, steps) = runner(vec![
            step(Action::Mint {
                token: TokenId(3),
                to: SELLER,
            }),
            step(Action::Approve {
                owner: SELLER,
                token: TokenId(3),
            }),
            step(Action::Commit {
                committer: SELLER,
                token: TokenId(3),
                price: Decimal::ONE,
                salt,
            }),
            expecting(
                Action::Reveal {
                    committer: SELLER,
                    token: TokenId(3),
                    price: Decimal::ONE,
                    salt,
                },
                "TP_ERR_212",
            ),
            step(Action::Advance { secs: 300 }),
            step(Action::Reveal {
                committer: SELLER,
                token: TokenId(3),
                price: Decimal::ONE,
                salt,
            }),
        ]);
        let reports = r.run_all(&steps);
        assert!(reports.iter().all(|s| !s.is_failure()), "{reports:#?}");
        assert_eq!(
            reports[5].events,
            vec!["LISTING_CREATED", "COMMITMENT_REVEALED"]
        );
        assert!(r.market().is_token_listed(TokenId(3)));
    }

    #[test]
    fn bundled_scenarios_pass() {
        let script = Script::from_json(include_str!("../scripts/scenarios.json")).unwrap();
        let mut r = Runner::new(&script, MarketConfig::default()).unwrap();
        let reports = r.run_all(&script.steps);
        let failures: Vec<_> = reports.iter().filter(|s| s.is_failure()).collect();
        assert!(failures.is_empty(), "{failures:#?}");
        assert_eq!(r.market().protocol_fees(), Decimal::ZERO);
        r.market().verify_invariants().unwrap();
    }

    #[test]
    fn report_serializes_flat() {
        let report = StepReport {
            step: 1,
            op: "withdraw",
            outcome: Outcome::Failed {
                error: "boom".into(),
            },
            events: Vec::new(),
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error"], "boom");
        assert!(v.get("events").is_none());
    }
}
