use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{ReservationStatus, Window};

/// Which reservations occupy a provider's time for the purpose of an overlap check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// Confirmed and active work. No two reservations in this scope may overlap.
    Committed,
    /// Every outstanding claim on the provider, used when admitting a new request so
    /// that two requests for the same open slot cannot both be accepted.
    Claims,
}

impl ConflictScope {
    pub fn statuses(&self) -> &'static [ReservationStatus] {
        match self {
            ConflictScope::Committed => &[ReservationStatus::Confirmed, ReservationStatus::Active],
            ConflictScope::Claims => &[
                ReservationStatus::Pending,
                ReservationStatus::Accepted,
                ReservationStatus::Confirmed,
                ReservationStatus::Active,
            ],
        }
    }
}

/// Must run on the same connection (and transaction) as the write it guards.
pub fn has_conflict(
    conn: &Connection,
    provider_id: &str,
    window: &Window,
    exclude_reservation_id: Option<&str>,
    scope: ConflictScope,
) -> Result<bool, AppError> {
    let conflict = queries::has_overlap(
        conn,
        provider_id,
        window,
        scope.statuses(),
        exclude_reservation_id,
    )?;
    if conflict {
        tracing::debug!(provider_id, ?scope, start = %window.start, end = %window.end, "window overlaps an existing reservation");
    }
    Ok(conflict)
}
