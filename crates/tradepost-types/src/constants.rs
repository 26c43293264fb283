//! System-wide constants for the Tradepost settlement engine.

/// Basis-point denominator: 10,000 bps == 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Default platform fee (2.5%).
pub const DEFAULT_FEE_BPS: u32 = 250;

/// Hard ceiling for the admin-settable fee (10%).
pub const MAX_FEE_BPS: u32 = 1_000;

/// Default minimum auction duration (1 hour).
pub const DEFAULT_MIN_AUCTION_SECS: i64 = 60 * 60;

/// Default maximum auction duration (7 days).
pub const DEFAULT_MAX_AUCTION_SECS: i64 = 7 * 24 * 60 * 60;

/// Default wait between `commit` and the earliest `reveal` (5 minutes).
pub const DEFAULT_REVEAL_WAIT_SECS: i64 = 5 * 60;

/// Default grace period after the wait window during which `reveal`
/// is still accepted (24 hours).
pub const DEFAULT_REVEAL_GRACE_SECS: i64 = 24 * 60 * 60;

/// Upper bound for any configured window (10 years). Keeps every
/// `chrono::Duration` built from config well inside its range.
pub const MAX_CONFIG_WINDOW_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Domain tag mixed into every commitment digest.
pub const COMMITMENT_DOMAIN: &[u8] = b"tradepost:commit:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Tradepost";
