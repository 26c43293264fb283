//! Commit-reveal coordinator.
//!
//! Sits in front of listing creation. A seller commits to a digest, waits
//! out `reveal_wait`, then reveals the pre-image within `reveal_grace`; the
//! reveal forwards to [`StateMachine::create_listing`] with the committer
//! as seller. A commitment is consumed exactly once. Past its window it can
//! be invalidated by anyone, or replaced by its owner's next commit.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradepost_types::{
    Address, Commitment, CommitmentHash, ListingId, MarketError, Result, Salt, TokenId,
};

use crate::collaborators::TokenRegistry;
use crate::state_machine::{CallContext, StateMachine};

/// The pre-image a committer reveals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRequest {
    pub token_id: TokenId,
    pub price: Decimal,
    pub salt: Salt,
}

/// Pending commitments, at most one per committer.
#[derive(Debug, Default)]
pub struct CommitRevealCoordinator {
    commitments: BTreeMap<Address, Commitment>,
}

impl CommitRevealCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commitment. Returns the expired commitment it replaced, if
    /// any.
    ///
    /// # Errors
    /// `SystemPaused`, `InvalidCommitment` for the all-zero digest,
    /// `AlreadyCommitted` while a previous commitment is still revealable.
    pub fn commit(
        &mut self,
        ctx: &CallContext<'_>,
        committer: Address,
        hash: CommitmentHash,
    ) -> Result<Option<Commitment>> {
        ctx.flag.ensure_live()?;
        if hash.is_zero() {
            return Err(MarketError::InvalidCommitment {
                reason: "all-zero digest".into(),
            });
        }
        if let Some(existing) = self.commitments.get(&committer) {
            if !existing.is_expired_at(
                ctx.now,
                ctx.config.reveal_wait(),
                ctx.config.reveal_grace(),
            ) {
                return Err(MarketError::AlreadyCommitted(committer));
            }
        }
        let replaced = self.commitments.insert(
            committer,
            Commitment {
                committer,
                hash,
                submitted_at: ctx.now,
            },
        );
        tracing::info!(
            %committer,
            %hash,
            replaced_expired = replaced.is_some(),
            "Commitment submitted"
        );
        Ok(replaced)
    }

    /// Verify the pre-image and create the listing it describes.
    ///
    /// The commitment is cleared only once the listing exists; if listing
    /// creation fails the commitment stays and can be revealed again.
    ///
    /// # Errors
    /// `SystemPaused`, `NoCommitment`, `HashMismatch`, `TooEarly`, `Expired`,
    /// and anything [`StateMachine::create_listing`] returns.
    pub fn reveal<R: TokenRegistry + ?Sized>(
        &mut self,
        ctx: &CallContext<'_>,
        machine: &mut StateMachine,
        registry: &R,
        committer: Address,
        request: &RevealRequest,
    ) -> Result<ListingId> {
        ctx.flag.ensure_live()?;
        let commitment = self
            .commitments
            .get(&committer)
            .ok_or(MarketError::NoCommitment(committer))?;
        if !commitment.matches(request.token_id, request.price, &request.salt) {
            return Err(MarketError::HashMismatch);
        }
        let wait = ctx.config.reveal_wait();
        let grace = ctx.config.reveal_grace();
        let reveal_at = commitment.reveal_opens_at(wait);
        if ctx.now < reveal_at {
            return Err(MarketError::TooEarly { reveal_at });
        }
        if commitment.is_expired_at(ctx.now, wait, grace) {
            return Err(MarketError::Expired {
                expired_at: commitment.expires_at(wait, grace),
            });
        }

        let listing_id =
            machine.create_listing(ctx, registry, request.token_id, request.price, committer)?;
        self.commitments.remove(&committer);
        tracing::info!(%committer, listing = %listing_id, "Commitment revealed");
        Ok(listing_id)
    }

    /// Drop a commitment whose reveal window has passed. Permissionless.
    ///
    /// # Errors
    /// `SystemPaused`, `NoCommitment`, `CommitmentNotExpired`.
    pub fn invalidate_expired(
        &mut self,
        ctx: &CallContext<'_>,
        committer: Address,
    ) -> Result<Commitment> {
        ctx.flag.ensure_live()?;
        let commitment = self
            .commitments
            .get(&committer)
            .ok_or(MarketError::NoCommitment(committer))?;
        let (wait, grace) = (ctx.config.reveal_wait(), ctx.config.reveal_grace());
        if !commitment.is_expired_at(ctx.now, wait, grace) {
            return Err(MarketError::CommitmentNotExpired {
                expires_at: commitment.expires_at(wait, grace),
            });
        }
        let removed = self
            .commitments
            .remove(&committer)
            .ok_or(MarketError::NoCommitment(committer))?;
        tracing::info!(%committer, "Expired commitment invalidated");
        Ok(removed)
    }

    #[must_use]
    pub fn commitment_of(&self, committer: Address) -> Option<&Commitment> {
        self.commitments.get(&committer)
    }

    pub fn commitments(&self) -> impl Iterator<Item = &Commitment> {
        self.commitments.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commitments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }

    /// Rebuild from persisted commitments.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if a committer appears twice.
    pub fn from_commitments(commitments: Vec<Commitment>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for c in commitments {
            if let Some(dup) = map.insert(c.committer, c) {
                return Err(MarketError::InvariantViolation {
                    reason: format!("two commitments for {}", dup.committer),
                });
            }
        }
        Ok(Self { commitments: map })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use tradepost_types::{MarketConfig, SystemFlag};

    use super::*;
    use crate::collaborators::InMemoryTokenRegistry;

    const OPERATOR: Address = Address([0xee; 20]);
    const SALT: Salt = [7u8; 32];

    struct Env {
        flag: SystemFlag,
        config: MarketConfig,
        now: DateTime<Utc>,
    }

    impl Env {
        fn new() -> Self {
            Self {
                flag: SystemFlag::new(Address::repeat_byte(0xaa)),
                config: MarketConfig::default(),
                now: Utc::now(),
            }
        }

        fn ctx(&self) -> CallContext<'_> {
            CallContext {
                flag: &self.flag,
                config: &self.config,
                now: self.now,
                operator: OPERATOR,
            }
        }
    }

    fn seller() -> Address {
        Address::repeat_byte(1)
    }

    fn request() -> RevealRequest {
        RevealRequest {
            token_id: TokenId(7),
            price: Decimal::new(1, 1),
            salt: SALT,
        }
    }

    fn digest() -> CommitmentHash {
        let r = request();
        CommitmentHash::compute(r.token_id, r.price, &r.salt, seller())
    }

    fn registry() -> InMemoryTokenRegistry {
        let mut reg = InMemoryTokenRegistry::new();
        reg.mint(TokenId(7), seller()).unwrap();
        reg.approve(seller(), TokenId(7), OPERATOR).unwrap();
        reg
    }

    #[test]
    fn zero_digest_rejected() {
        let env = Env::new();
        let mut crc = CommitRevealCoordinator::new();
        assert!(matches!(
            crc.commit(&env.ctx(), seller(), CommitmentHash([0u8; 32])),
            Err(MarketError::InvalidCommitment { .. })
        ));
        assert!(crc.is_empty());
    }

    #[test]
    fn second_live_commit_rejected() {
        let env = Env::new();
        let mut crc = CommitRevealCoordinator::new();
        crc.commit(&env.ctx(), seller(), digest()).unwrap();
        assert!(matches!(
            crc.commit(&env.ctx(), seller(), CommitmentHash([1u8; 32])),
            Err(MarketError::AlreadyCommitted(_))
        ));
        assert_eq!(crc.commitment_of(seller()).unwrap().hash, digest());
    }

    #[test]
    fn reveal_window_is_inclusive() {
        let mut env = Env::new();
        let mut crc = CommitRevealCoordinator::new();
        let mut machine = StateMachine::new();
        let reg = registry();
        let start = env.now;
        crc.commit(&env.ctx(), seller(), digest()).unwrap();

        env.now = start + Duration::seconds(299);
        assert!(matches!(
            crc.reveal(&env.ctx(), &mut machine, &reg, seller(), &request()),
            Err(MarketError::TooEarly { .. })
        ));

        env.now = start + Duration::seconds(300);
        let id = crc
            .reveal(&env.ctx(), &mut machine, &reg, seller(), &request())
            .unwrap();
        assert_eq!(machine.ledger().get(id).unwrap().seller, seller());
        assert!(crc.commitment_of(seller()).is_none());

        // Consumed: a replay finds nothing.
        assert!(matches!(
            crc.reveal(&env.ctx(), &mut machine, &reg, seller(), &request()),
            Err(MarketError::NoCommitment(_))
        ));
    }

    #[test]
    fn reveal_after_grace_expires() {
        let mut env = Env::new();
        let mut crc = CommitRevealCoordinator::new();
        let mut machine = StateMachine::new();
        let reg = registry();
        let start = env.now;
        crc.commit(&env.ctx(), seller(), digest()).unwrap();

        env.now = start + Duration::seconds(300 + 86_400);
        assert!(
            crc.reveal(&env.ctx(), &mut machine, &reg, seller(), &request())
                .is_ok()
        );

        crc.commit(&env.ctx(), seller(), digest()).unwrap();
        env.now += Duration::seconds(300 + 86_400 + 1);
        assert!(matches!(
            crc.reveal(&env.ctx(), &mut machine, &reg, seller(), &request()),
            Err(MarketError::Expired { .. })
        ));
    }

    #[test]
    fn wrong_preimage_is_mismatch() {
        let mut env = Env::new();
        let mut crc = CommitRevealCoordinator::new();
        let mut machine = StateMachine::new();
        let reg = registry();
        crc.commit(&env.ctx(), seller(), digest()).unwrap();
        env.now += Duration::minutes(10);

        let mut wrong = request();
        wrong.price = Decimal::new(2, 1);
        assert!(matches!(
            crc.reveal(&env.ctx(), &mut machine, &reg, seller(), &wrong),
            Err(MarketError::HashMismatch)
        ));
        // Someone else cannot reveal the seller's commitment either.
        assert!(matches!(
            crc.reveal(&env.ctx(), &mut machine, &reg, Address::repeat_byte(2), &request()),
            Err(MarketError::NoCommitment(_))
        ));
    }

    #[test]
    fn failed_listing_keeps_commitment() {
        let mut env = Env::new();
        let mut crc = CommitRevealCoordinator::new();
        let mut machine = StateMachine::new();
        let mut reg = InMemoryTokenRegistry::new();
        reg.mint(TokenId(7), seller()).unwrap();
        crc.commit(&env.ctx(), seller(), digest()).unwrap();
        env.now += Duration::minutes(10);

        assert!(matches!(
            crc.reveal(&env.ctx(), &mut machine, &reg, seller(), &request()),
            Err(MarketError::NotApproved(_))
        ));
        assert!(crc.commitment_of(seller()).is_some());
        assert!(machine.ledger().is_empty());

        reg.approve(seller(), TokenId(7), OPERATOR).unwrap();
        crc.reveal(&env.ctx(), &mut machine, &reg, seller(), &request())
            .unwrap();
    }

    #[test]
    fn invalidate_only_after_expiry() {
        let mut env = Env::new();
        let mut crc = CommitRevealCoordinator::new();
        crc.commit(&env.ctx(), seller(), digest()).unwrap();
        assert!(matches!(
            crc.invalidate_expired(&env.ctx(), seller()),
            Err(MarketError::CommitmentNotExpired { .. })
        ));
        env.now += Duration::days(2);
        let removed = crc.invalidate_expired(&env.ctx(), seller()).unwrap();
        assert_eq!(removed.hash, digest());
        assert!(matches!(
            crc.invalidate_expired(&env.ctx(), seller()),
            Err(MarketError::NoCommitment(_))
        ));
    }

    #[test]
    fn expired_commitment_replaced_by_new_commit() {
        let mut env = Env::new();
        let mut crc = CommitRevealCoordinator::new();
        crc.commit(&env.ctx(), seller(), CommitmentHash([3u8; 32]))
            .unwrap();
        env.now += Duration::days(2);
        let replaced = crc.commit(&env.ctx(), seller(), digest()).unwrap();
        assert_eq!(replaced.unwrap().hash, CommitmentHash([3u8; 32]));
        assert_eq!(crc.len(), 1);
    }
}
