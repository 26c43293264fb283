//! Identifiers used throughout Tradepost.
//!
//! Listing IDs are monotonically assigned by the ledger and never reused.
//! Addresses are 20-byte account identifiers rendered as `0x`-prefixed hex.
//! Event IDs use UUIDv7 for time-ordered sorting.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::MarketError;

// ---------------------------------------------------------------------------
// ListingId
// ---------------------------------------------------------------------------

/// Ledger-assigned listing identifier. Auctions share the same id space.
///
/// The first listing is `ListingId(1)`; `0` is never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ListingId(pub u64);

impl ListingId {
    /// The id handed out to the very first listing.
    pub const FIRST: Self = Self(1);

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listing:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TokenId
// ---------------------------------------------------------------------------

/// Identifier of an NFT in the external token registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account address (seller, bidder, owner, operator).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address. Never a valid owner.
    pub const ZERO: Self = Self([0u8; 20]);

    #[must_use]
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Address with every byte set to `byte`. Handy for fixtures and scripts.
    #[must_use]
    pub fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// First four bytes in hex, for compact log fields.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| MarketError::InvalidAddress {
            reason: format!("{s}: {e}"),
        })?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| MarketError::InvalidAddress {
                reason: format!("{s}: expected 20 bytes, got {}", v.len()),
            })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Random address for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Address {
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random::<[u8; 20]>())
    }
}

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Unique identifier for an emitted market event. Uses UUIDv7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_id_next() {
        assert_eq!(ListingId::FIRST.next(), ListingId(2));
    }

    #[test]
    fn address_display_is_prefixed_hex() {
        let addr = Address::repeat_byte(0xab);
        let s = addr.to_string();
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 42);
        assert_eq!(addr.short(), "abababab");
    }

    #[test]
    fn address_parses_with_and_without_prefix() {
        let addr = Address::random();
        let with: Address = addr.to_string().parse().unwrap();
        let without: Address = addr.to_string()[2..].parse().unwrap();
        assert_eq!(with, addr);
        assert_eq!(without, addr);
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "0xabcd".parse::<Address>().unwrap_err();
        assert!(matches!(err, MarketError::InvalidAddress { .. }));
        let err = "0xzz".parse::<Address>().unwrap_err();
        assert!(matches!(err, MarketError::InvalidAddress { .. }));
    }

    #[test]
    fn address_serializes_as_string() {
        let addr = Address::repeat_byte(1);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn zero_address() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::repeat_byte(1).is_zero());
    }

    #[test]
    fn event_id_ordering() {
        let a = EventId::new();
        let b = EventId::new();
        assert!(a < b);
    }
}
