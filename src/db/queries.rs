use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    ActorRole, CounterDelta, Page, PageRequest, Payment, Provider, ProviderCounters, Reservation,
    ReservationFilter, ReservationStatus, StatusChange, Window,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.format(TS_FORMAT).to_string()
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_status(idx: usize, s: &str) -> rusqlite::Result<ReservationStatus> {
    ReservationStatus::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown reservation status: {s}").into(),
        )
    })
}

fn parse_role(idx: usize, s: &str) -> rusqlite::Result<ActorRole> {
    ActorRole::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown actor role: {s}").into(),
        )
    })
}

/// SQL list literal for a fixed set of statuses, e.g. `'confirmed','active'`.
fn status_list(statuses: &[ReservationStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

// ── Providers ──

pub fn get_provider(conn: &Connection, id: &str) -> rusqlite::Result<Option<Provider>> {
    conn.query_row(
        "SELECT id, display_name, hourly_rate_cents, is_active, pending_requests, booking_count,
                completed_bookings, is_busy, next_available_at
         FROM providers WHERE id = ?1",
        params![id],
        |row| {
            let next_available_at = row
                .get::<_, Option<String>>(8)?
                .map(|s| parse_ts(8, &s))
                .transpose()?;
            Ok(Provider {
                id: row.get(0)?,
                display_name: row.get(1)?,
                hourly_rate_cents: row.get(2)?,
                is_active: row.get::<_, i32>(3)? != 0,
                counters: ProviderCounters {
                    pending_requests: row.get(4)?,
                    booking_count: row.get(5)?,
                    completed_bookings: row.get(6)?,
                    is_busy: row.get::<_, i32>(7)? != 0,
                    next_available_at,
                },
            })
        },
    )
    .optional()
}

/// Inserts or updates the profile fields of a provider. Counters are left untouched.
pub fn upsert_provider(
    conn: &Connection,
    id: &str,
    display_name: &str,
    hourly_rate_cents: i64,
    is_active: bool,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO providers (id, display_name, hourly_rate_cents, is_active)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           display_name = excluded.display_name,
           hourly_rate_cents = excluded.hourly_rate_cents,
           is_active = excluded.is_active,
           updated_at = datetime('now')",
        params![id, display_name, hourly_rate_cents, is_active as i32],
    )?;
    Ok(())
}

/// Applies a counter delta with in-place SQL arithmetic. Decrements that would go
/// below zero are clamped and logged.
pub fn adjust_counters(
    conn: &Connection,
    provider_id: &str,
    delta: &CounterDelta,
) -> rusqlite::Result<()> {
    let counters = [
        ("pending_requests", delta.pending_requests),
        ("booking_count", delta.booking_count),
        ("completed_bookings", delta.completed_bookings),
    ];

    for (column, amount) in counters {
        if amount == 0 {
            continue;
        }
        let applied = conn.execute(
            &format!(
                "UPDATE providers SET {column} = {column} + ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND {column} + ?1 >= 0"
            ),
            params![amount, provider_id],
        )?;
        if applied == 0 {
            let clamped = conn.execute(
                &format!(
                    "UPDATE providers SET {column} = 0, updated_at = datetime('now') WHERE id = ?1"
                ),
                params![provider_id],
            )?;
            if clamped > 0 {
                tracing::warn!(
                    provider_id,
                    counter = column,
                    delta = amount,
                    "counter underflow clamped to zero"
                );
            }
        }
    }

    // The busy flag follows the provider's active reservations, so ending one
    // engagement leaves the flag set while another is still running.
    let busy_sql = match delta.busy {
        Some(true) => Some(
            "UPDATE providers SET
               is_busy = 1,
               next_available_at = (SELECT MAX(end_at) FROM reservations
                                    WHERE provider_id = ?1 AND status = 'active'),
               updated_at = datetime('now')
             WHERE id = ?1",
        ),
        Some(false) => Some(
            "UPDATE providers SET
               is_busy = EXISTS(SELECT 1 FROM reservations
                                WHERE provider_id = ?1 AND status = 'active'),
               next_available_at = (SELECT MAX(end_at) FROM reservations
                                    WHERE provider_id = ?1 AND status = 'active'),
               updated_at = datetime('now')
             WHERE id = ?1",
        ),
        None => None,
    };
    if let Some(sql) = busy_sql {
        conn.execute(sql, params![provider_id])?;
    }

    Ok(())
}

// ── Reservations ──

pub fn has_overlap(
    conn: &Connection,
    provider_id: &str,
    window: &Window,
    statuses: &[ReservationStatus],
    exclude_id: Option<&str>,
) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT EXISTS(
            SELECT 1 FROM reservations
            WHERE provider_id = ?1
              AND status IN ({})
              AND start_at < ?3 AND ?2 < end_at
              AND (?4 IS NULL OR id != ?4)
         )",
        status_list(statuses)
    );
    conn.query_row(
        &sql,
        params![provider_id, fmt_ts(&window.start), fmt_ts(&window.end), exclude_id],
        |row| row.get(0),
    )
}

pub fn insert_reservation(conn: &Connection, reservation: &Reservation) -> rusqlite::Result<()> {
    let details = serde_json::to_string(&reservation.details)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO reservations (id, requester_id, provider_id, start_at, end_at, status,
                                   hourly_rate_cents, estimated_total_cents, details, version,
                                   created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            reservation.id,
            reservation.requester_id,
            reservation.provider_id,
            fmt_ts(&reservation.window.start),
            fmt_ts(&reservation.window.end),
            reservation.status.as_str(),
            reservation.payment.hourly_rate_cents,
            reservation.payment.estimated_total_cents,
            details,
            reservation.version,
            fmt_ts(&reservation.created_at),
            fmt_ts(&reservation.updated_at),
        ],
    )?;

    for change in &reservation.status_history {
        append_status_change(conn, &reservation.id, change)?;
    }
    Ok(())
}

/// Compare-and-set on the status column. Returns `false` when the row is no longer in
/// `expected` (or does not exist).
pub fn update_status_if(
    conn: &Connection,
    id: &str,
    expected: ReservationStatus,
    next: ReservationStatus,
    at: &DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE reservations SET status = ?1, version = version + 1, updated_at = ?2
         WHERE id = ?3 AND status = ?4",
        params![next.as_str(), fmt_ts(at), id, expected.as_str()],
    )?;
    Ok(count > 0)
}

pub fn append_status_change(
    conn: &Connection,
    reservation_id: &str,
    change: &StatusChange,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO reservation_status_history (reservation_id, status, actor_id, actor_role, reason, at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            reservation_id,
            change.status.as_str(),
            change.actor_id,
            change.actor_role.as_str(),
            change.reason,
            fmt_ts(&change.at),
        ],
    )?;
    Ok(())
}

fn get_status_history(conn: &Connection, reservation_id: &str) -> rusqlite::Result<Vec<StatusChange>> {
    let mut stmt = conn.prepare(
        "SELECT status, actor_id, actor_role, reason, at
         FROM reservation_status_history WHERE reservation_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![reservation_id], |row| {
        Ok(StatusChange {
            status: parse_status(0, &row.get::<_, String>(0)?)?,
            actor_id: row.get(1)?,
            actor_role: parse_role(2, &row.get::<_, String>(2)?)?,
            reason: row.get(3)?,
            at: parse_ts(4, &row.get::<_, String>(4)?)?,
        })
    })?;

    rows.collect()
}

const RESERVATION_COLUMNS: &str = "id, requester_id, provider_id, start_at, end_at, status, \
     hourly_rate_cents, estimated_total_cents, details, version, created_at, updated_at";

fn parse_reservation_row(row: &rusqlite::Row) -> rusqlite::Result<Reservation> {
    let details_json: String = row.get(8)?;
    let details = serde_json::from_str(&details_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(Reservation {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        provider_id: row.get(2)?,
        window: Window {
            start: parse_ts(3, &row.get::<_, String>(3)?)?,
            end: parse_ts(4, &row.get::<_, String>(4)?)?,
        },
        status: parse_status(5, &row.get::<_, String>(5)?)?,
        status_history: Vec::new(),
        payment: Payment {
            hourly_rate_cents: row.get(6)?,
            estimated_total_cents: row.get(7)?,
        },
        details,
        version: row.get(9)?,
        created_at: parse_ts(10, &row.get::<_, String>(10)?)?,
        updated_at: parse_ts(11, &row.get::<_, String>(11)?)?,
    })
}

pub fn get_reservation(conn: &Connection, id: &str) -> rusqlite::Result<Option<Reservation>> {
    let reservation = conn
        .query_row(
            &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1"),
            params![id],
            parse_reservation_row,
        )
        .optional()?;

    match reservation {
        Some(mut r) => {
            r.status_history = get_status_history(conn, &r.id)?;
            Ok(Some(r))
        }
        None => Ok(None),
    }
}

pub fn list_reservations(
    conn: &Connection,
    filter: &ReservationFilter,
    page: PageRequest,
) -> rusqlite::Result<Page<Reservation>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some((role, owner_id)) = &filter.owner {
        match role {
            ActorRole::Requester => clauses.push("requester_id = ?"),
            ActorRole::Provider => clauses.push("provider_id = ?"),
            ActorRole::Admin => {}
        }
        if *role != ActorRole::Admin {
            params_vec.push(Box::new(owner_id.clone()));
        }
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        params_vec.push(Box::new(status.as_str()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM reservations{where_sql}"),
        params_refs.as_slice(),
        |row| row.get(0),
    )?;

    let limit = i64::from(page.per_page);
    let offset = page.offset();
    let mut page_params = params_refs.clone();
    page_params.push(&limit);
    page_params.push(&offset);

    let mut stmt = conn.prepare(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations{where_sql}
         ORDER BY start_at DESC, id ASC LIMIT ? OFFSET ?"
    ))?;
    let rows = stmt.query_map(page_params.as_slice(), parse_reservation_row)?;

    let mut items = vec![];
    for row in rows {
        let mut reservation = row?;
        reservation.status_history = get_status_history(conn, &reservation.id)?;
        items.push(reservation);
    }

    Ok(Page {
        items,
        page: page.page,
        per_page: page.per_page,
        total,
    })
}

pub fn count_by_status(conn: &Connection) -> rusqlite::Result<Vec<(ReservationStatus, i64)>> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM reservations GROUP BY status")?;
    let rows = stmt.query_map([], |row| {
        Ok((parse_status(0, &row.get::<_, String>(0)?)?, row.get(1)?))
    })?;
    rows.collect()
}
