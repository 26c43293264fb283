//! Commit-reveal commitments for front-running-resistant listing.
//!
//! A seller first publishes only a digest of `(token_id, price, salt,
//! committer)`. After the wait window the seller reveals the pre-image and
//! the listing is created. Binding the committer's address into the digest
//! stops a third party from replaying someone else's commitment.
//!
//! ## Lifecycle
//!
//! ```text
//!   NoCommitment ──commit──▶ Committed ──reveal──▶ Revealed
//!                                │
//!                                └── wait + grace elapsed ──▶ Expired
//! ```

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{constants, Address, MarketError, Result, TokenId};

/// Opaque 32-byte salt chosen by the committer.
pub type Salt = [u8; 32];

/// SHA-256 commitment digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitmentHash(pub [u8; 32]);

impl CommitmentHash {
    /// Digest over `domain || token_id || price || salt || committer`.
    ///
    /// `price` is hashed through its normalized decimal string so that
    /// `0.10` and `0.1` commit to the same value.
    #[must_use]
    pub fn compute(token_id: TokenId, price: Decimal, salt: &Salt, committer: Address) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(constants::COMMITMENT_DOMAIN);
        hasher.update(token_id.0.to_le_bytes());
        hasher.update(price.normalize().to_string().as_bytes());
        hasher.update(salt);
        hasher.update(committer.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Parse a 64-hex-digit digest (optional `0x` prefix).
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| MarketError::InvalidCommitment {
            reason: format!("not hex: {e}"),
        })?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| MarketError::InvalidCommitment {
                reason: format!("expected 32 bytes, got {}", v.len()),
            })?;
        Ok(Self(bytes))
    }

    /// The all-zero digest is what an uninitialized client sends.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Display for CommitmentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..8]))
    }
}

/// A stored commitment, keyed by committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub committer: Address,
    pub hash: CommitmentHash,
    pub submitted_at: DateTime<Utc>,
}

impl Commitment {
    /// Earliest instant a reveal is accepted.
    #[must_use]
    pub fn reveal_opens_at(&self, wait: Duration) -> DateTime<Utc> {
        self.submitted_at + wait
    }

    /// Last instant a reveal is accepted (inclusive).
    #[must_use]
    pub fn expires_at(&self, wait: Duration, grace: Duration) -> DateTime<Utc> {
        self.submitted_at + wait + grace
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, wait: Duration, grace: Duration) -> bool {
        now > self.expires_at(wait, grace)
    }

    /// Does the pre-image hash to this commitment?
    #[must_use]
    pub fn matches(&self, token_id: TokenId, price: Decimal, salt: &Salt) -> bool {
        CommitmentHash::compute(token_id, price, salt, self.committer) == self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment(committer: Address) -> Commitment {
        Commitment {
            committer,
            hash: CommitmentHash::compute(TokenId(7), Decimal::new(1, 1), &[9u8; 32], committer),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn digest_is_deterministic() {
        let who = Address::repeat_byte(1);
        let a = CommitmentHash::compute(TokenId(1), Decimal::ONE, &[0u8; 32], who);
        let b = CommitmentHash::compute(TokenId(1), Decimal::ONE, &[0u8; 32], who);
        assert_eq!(a, b);
    }

    #[test]
    fn digest_binds_committer() {
        let a =
            CommitmentHash::compute(TokenId(1), Decimal::ONE, &[0u8; 32], Address::repeat_byte(1));
        let b =
            CommitmentHash::compute(TokenId(1), Decimal::ONE, &[0u8; 32], Address::repeat_byte(2));
        assert_ne!(a, b);
    }

    #[test]
    fn digest_ignores_trailing_zeros() {
        let who = Address::repeat_byte(1);
        let a = CommitmentHash::compute(TokenId(1), Decimal::new(10, 2), &[0u8; 32], who);
        let b = CommitmentHash::compute(TokenId(1), Decimal::new(1, 1), &[0u8; 32], who);
        assert_eq!(a, b);
    }

    #[test]
    fn matches_requires_exact_preimage() {
        let who = Address::repeat_byte(3);
        let c = commitment(who);
        assert!(c.matches(TokenId(7), Decimal::new(1, 1), &[9u8; 32]));
        assert!(!c.matches(TokenId(7), Decimal::new(1, 1), &[8u8; 32]));
        assert!(!c.matches(TokenId(8), Decimal::new(1, 1), &[9u8; 32]));
        assert!(!c.matches(TokenId(7), Decimal::new(2, 1), &[9u8; 32]));
    }

    #[test]
    fn window_boundaries() {
        let c = commitment(Address::repeat_byte(4));
        let wait = Duration::minutes(5);
        let grace = Duration::hours(1);
        let expires = c.expires_at(wait, grace);
        assert_eq!(c.reveal_opens_at(wait), c.submitted_at + wait);
        assert!(!c.is_expired_at(expires, wait, grace));
        assert!(c.is_expired_at(expires + Duration::seconds(1), wait, grace));
    }

    #[test]
    fn hex_roundtrip_and_rejects() {
        let h = CommitmentHash([0xcd; 32]);
        assert_eq!(CommitmentHash::from_hex(&h.to_hex()).unwrap(), h);
        assert!(matches!(
            CommitmentHash::from_hex("0x1234"),
            Err(MarketError::InvalidCommitment { .. })
        ));
        assert!(CommitmentHash([0u8; 32]).is_zero());
    }
}
