use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest hourly rate a provider profile may carry.
pub const MAX_HOURLY_RATE_CENTS: i64 = 100_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub display_name: String,
    pub hourly_rate_cents: i64,
    pub is_active: bool,
    pub counters: ProviderCounters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderCounters {
    pub pending_requests: i64,
    pub booking_count: i64,
    pub completed_bookings: i64,
    pub is_busy: bool,
    pub next_available_at: Option<DateTime<Utc>>,
}

/// Counter adjustments produced by a single status write.
///
/// `busy` is `Some(true)` when the provider starts an engagement and `Some(false)`
/// when one ends; the store resolves it against the provider's remaining active work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub pending_requests: i64,
    pub booking_count: i64,
    pub completed_bookings: i64,
    pub busy: Option<bool>,
}

impl CounterDelta {
    pub fn is_empty(&self) -> bool {
        *self == CounterDelta::default()
    }
}
