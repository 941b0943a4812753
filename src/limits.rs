use crate::model::{HOUR_MS, MINUTE_MS, Ms};

// ── Booking policy defaults ──────────────────────────────────────

pub const MIN_LEAD_TIME_MS: Ms = HOUR_MS;
pub const MIN_DURATION_MS: Ms = HOUR_MS;
pub const MAX_DURATION_MS: Ms = 4 * HOUR_MS;
pub const PAYMENT_TIMEOUT_MS: Ms = 15 * MINUTE_MS;

pub const FULL_REFUND_LEAD_MS: Ms = 24 * HOUR_MS;
pub const PARTIAL_REFUND_LEAD_MS: Ms = 12 * HOUR_MS;
pub const PARTIAL_REFUND_PERCENT: u8 = 50;

// ── Hard limits ──────────────────────────────────────────────────

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_VENUES: usize = 100_000;
pub const MAX_BOOKINGS_PER_VENUE: usize = 1_000_000;
pub const MAX_NOTES_LEN: usize = 1024;
pub const MAX_PAYMENT_REF_LEN: usize = 256;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Widest window a single availability query may cover.
pub const MAX_AVAILABILITY_WINDOW_MS: Ms = 31 * 24 * HOUR_MS;
