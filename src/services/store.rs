use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, TransactionBehavior};
use tokio::sync::Mutex;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    CounterDelta, Page, PageRequest, Provider, Reservation, ReservationFilter, ReservationStatus,
    StatusChange,
};
use crate::services::conflict::{has_conflict, ConflictScope};

/// Read access to provider records.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn get_provider(&self, id: &str, timeout: Duration)
        -> Result<Option<Provider>, AppError>;
}

/// A status write that only lands if the reservation is still in `expected`.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub reservation_id: String,
    pub expected: ReservationStatus,
    pub change: StatusChange,
    pub delta: CounterDelta,
    pub guard: Option<ConflictScope>,
}

/// Durable reservation storage. Every write is a single atomic unit that also
/// carries the provider counter changes it implies.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get(&self, id: &str, timeout: Duration) -> Result<Option<Reservation>, AppError>;

    /// Inserts `reservation` unless it overlaps something in `guard`, applying `delta`
    /// to its provider in the same transaction.
    async fn insert_checked(
        &self,
        reservation: Reservation,
        guard: Option<ConflictScope>,
        delta: CounterDelta,
        timeout: Duration,
    ) -> Result<Reservation, AppError>;

    async fn update_if_status(
        &self,
        update: StatusUpdate,
        timeout: Duration,
    ) -> Result<Reservation, AppError>;

    async fn list(
        &self,
        filter: ReservationFilter,
        page: PageRequest,
        timeout: Duration,
    ) -> Result<Page<Reservation>, AppError>;
}

/// SQLite-backed directory and booking store sharing one connection.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` with exclusive use of the connection. Only the wait for the connection is
    /// bounded by `timeout`; once `f` starts it runs to completion so a transaction is never
    /// abandoned half way.
    async fn with_conn<T, F>(&self, timeout: Duration, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = tokio::time::timeout(timeout, Arc::clone(&self.conn).lock_owned())
            .await
            .map_err(|_| {
                AppError::Unavailable(format!(
                    "timed out after {}ms waiting for the store",
                    timeout.as_millis()
                ))
            })?;

        tokio::task::spawn_blocking(move || f(&mut *guard))
            .await
            .map_err(|e| AppError::Unavailable(format!("store task failed: {e}")))?
    }

    pub async fn upsert_provider(
        &self,
        id: String,
        display_name: String,
        hourly_rate_cents: i64,
        is_active: bool,
        timeout: Duration,
    ) -> Result<Provider, AppError> {
        self.with_conn(timeout, move |conn| {
            queries::upsert_provider(conn, &id, &display_name, hourly_rate_cents, is_active)?;
            queries::get_provider(conn, &id)?
                .ok_or_else(|| AppError::NotFound(format!("provider {id}")))
        })
        .await
    }

    pub async fn status_counts(
        &self,
        timeout: Duration,
    ) -> Result<Vec<(ReservationStatus, i64)>, AppError> {
        self.with_conn(timeout, |conn| Ok(queries::count_by_status(conn)?))
            .await
    }
}

#[async_trait]
impl ProviderDirectory for SqliteStore {
    async fn get_provider(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<Provider>, AppError> {
        let id = id.to_string();
        self.with_conn(timeout, move |conn| Ok(queries::get_provider(conn, &id)?))
            .await
    }
}

#[async_trait]
impl BookingStore for SqliteStore {
    async fn get(&self, id: &str, timeout: Duration) -> Result<Option<Reservation>, AppError> {
        let id = id.to_string();
        self.with_conn(timeout, move |conn| Ok(queries::get_reservation(conn, &id)?))
            .await
    }

    async fn insert_checked(
        &self,
        reservation: Reservation,
        guard: Option<ConflictScope>,
        delta: CounterDelta,
        timeout: Duration,
    ) -> Result<Reservation, AppError> {
        self.with_conn(timeout, move |conn| {
            // IMMEDIATE takes the write lock before the overlap read.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(scope) = guard {
                if has_conflict(
                    &tx,
                    &reservation.provider_id,
                    &reservation.window,
                    None,
                    scope,
                )? {
                    return Err(AppError::SchedulingConflict);
                }
            }

            queries::insert_reservation(&tx, &reservation)?;
            if !delta.is_empty() {
                queries::adjust_counters(&tx, &reservation.provider_id, &delta)?;
            }
            tx.commit()?;
            Ok(reservation)
        })
        .await
    }

    async fn update_if_status(
        &self,
        update: StatusUpdate,
        timeout: Duration,
    ) -> Result<Reservation, AppError> {
        self.with_conn(timeout, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current = queries::get_reservation(&tx, &update.reservation_id)?
                .ok_or_else(|| AppError::NotFound(format!("reservation {}", update.reservation_id)))?;
            if current.status != update.expected {
                return Err(AppError::Conflict);
            }

            if let Some(scope) = update.guard {
                if has_conflict(
                    &tx,
                    &current.provider_id,
                    &current.window,
                    Some(&current.id),
                    scope,
                )? {
                    return Err(AppError::SchedulingConflict);
                }
            }

            let applied = queries::update_status_if(
                &tx,
                &current.id,
                update.expected,
                update.change.status,
                &update.change.at,
            )?;
            if !applied {
                return Err(AppError::Conflict);
            }
            queries::append_status_change(&tx, &current.id, &update.change)?;
            if !update.delta.is_empty() {
                queries::adjust_counters(&tx, &current.provider_id, &update.delta)?;
            }

            let updated = queries::get_reservation(&tx, &current.id)?
                .ok_or_else(|| AppError::NotFound(format!("reservation {}", current.id)))?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn list(
        &self,
        filter: ReservationFilter,
        page: PageRequest,
        timeout: Duration,
    ) -> Result<Page<Reservation>, AppError> {
        self.with_conn(timeout, move |conn| {
            Ok(queries::list_reservations(conn, &filter, page)?)
        })
        .await
    }
}
