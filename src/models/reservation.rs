use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::ActorRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub requester_id: String,
    pub provider_id: String,
    pub window: Window,
    pub status: ReservationStatus,
    pub status_history: Vec<StatusChange>,
    pub payment: Payment,
    pub details: ServiceDetails,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Half-open `[start, end)` interval a reservation occupies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Builds a window truncated to whole seconds, which is the precision the store keeps.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AppError> {
        let start = truncate_to_second(start);
        let end = truncate_to_second(end);
        if end <= start {
            return Err(AppError::Validation(
                "window end must be after window start".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

fn truncate_to_second(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Draft,
    Pending,
    Accepted,
    Rejected,
    Confirmed,
    Active,
    Completed,
    Cancelled,
    NoShow,
    Disputed,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 10] = [
        ReservationStatus::Draft,
        ReservationStatus::Pending,
        ReservationStatus::Accepted,
        ReservationStatus::Rejected,
        ReservationStatus::Confirmed,
        ReservationStatus::Active,
        ReservationStatus::Completed,
        ReservationStatus::Cancelled,
        ReservationStatus::NoShow,
        ReservationStatus::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Draft => "draft",
            ReservationStatus::Pending => "pending",
            ReservationStatus::Accepted => "accepted",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::NoShow => "no_show",
            ReservationStatus::Disputed => "disputed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Rejected
                | ReservationStatus::Completed
                | ReservationStatus::Cancelled
                | ReservationStatus::NoShow
                | ReservationStatus::Disputed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub status: ReservationStatus,
    pub actor_id: String,
    pub actor_role: ActorRole,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub hourly_rate_cents: i64,
    pub estimated_total_cents: i64,
}

impl Payment {
    pub fn snapshot(hourly_rate_cents: i64, window: &Window) -> Result<Self, AppError> {
        let minutes = window.duration().num_minutes();
        let estimated_total_cents = hourly_rate_cents
            .checked_mul(minutes)
            .map(|cents| cents / 60)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "estimated total overflows for rate {hourly_rate_cents} over {minutes} minutes"
                ))
            })?;
        Ok(Self {
            hourly_rate_cents,
            estimated_total_cents,
        })
    }
}

/// Which reservations a listing covers. `None` owner means every reservation.
#[derive(Debug, Clone)]
pub struct ReservationFilter {
    pub owner: Option<(ActorRole, String)>,
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceDetails {
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}
