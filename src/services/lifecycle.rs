//! Reservation state machine.
//!
//! Every legal status change is one row of [`TRANSITIONS`]. [`authorize`] is the only
//! place that decides whether an actor may take an edge, and [`side_effects`] is the only
//! place that derives provider counter changes from one.

use chrono::{DateTime, Utc};

use crate::errors::AppError;
use crate::models::{Actor, ActorRole, CounterDelta, Reservation, ReservationStatus, StatusChange};
use crate::services::conflict::ConflictScope;
use crate::services::store::StatusUpdate;

use crate::models::ActorRole::{Admin, Provider, Requester};
use crate::models::ReservationStatus::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub allowed: &'static [ActorRole],
}

const fn edge(
    from: ReservationStatus,
    to: ReservationStatus,
    allowed: &'static [ActorRole],
) -> Edge {
    Edge { from, to, allowed }
}

pub const TRANSITIONS: &[Edge] = &[
    edge(Draft, Pending, &[Requester]),
    edge(Pending, Accepted, &[Provider]),
    edge(Pending, Rejected, &[Provider]),
    edge(Pending, Cancelled, &[Requester]),
    edge(Accepted, Confirmed, &[Requester, Admin]),
    edge(Accepted, Cancelled, &[Requester]),
    edge(Confirmed, Active, &[Provider]),
    edge(Confirmed, Cancelled, &[Requester]),
    edge(Active, Completed, &[Provider]),
    edge(Active, NoShow, &[Provider]),
    edge(Active, Disputed, &[Provider, Admin]),
];

pub fn find_edge(from: ReservationStatus, to: ReservationStatus) -> Option<&'static Edge> {
    TRANSITIONS.iter().find(|e| e.from == from && e.to == to)
}

/// Statuses reachable from `from` by someone.
pub fn targets(from: ReservationStatus) -> impl Iterator<Item = ReservationStatus> {
    TRANSITIONS.iter().filter(move |e| e.from == from).map(|e| e.to)
}

pub fn authorize(
    reservation: &Reservation,
    target: ReservationStatus,
    actor: &Actor,
) -> Result<&'static Edge, AppError> {
    let edge = find_edge(reservation.status, target).ok_or(AppError::InvalidTransition {
        from: reservation.status,
        to: target,
    })?;

    if !edge.allowed.contains(&actor.role) {
        return Err(AppError::Forbidden(format!(
            "a {} cannot move a reservation from {} to {}",
            actor.role.as_str(),
            edge.from.as_str(),
            edge.to.as_str()
        )));
    }

    let owns = match actor.role {
        Requester => actor.id == reservation.requester_id,
        Provider => actor.id == reservation.provider_id,
        Admin => true,
    };
    if !owns {
        return Err(AppError::Forbidden(format!(
            "{} {} is not a party to reservation {}",
            actor.role.as_str(),
            actor.id,
            reservation.id
        )));
    }

    Ok(edge)
}

pub fn side_effects(from: ReservationStatus, to: ReservationStatus) -> CounterDelta {
    match (from, to) {
        (_, Pending) => CounterDelta {
            pending_requests: 1,
            ..Default::default()
        },
        (_, Accepted) => CounterDelta {
            pending_requests: -1,
            booking_count: 1,
            ..Default::default()
        },
        (_, Rejected) | (Pending, Cancelled) => CounterDelta {
            pending_requests: -1,
            ..Default::default()
        },
        (_, Active) => CounterDelta {
            busy: Some(true),
            ..Default::default()
        },
        (_, Completed) => CounterDelta {
            completed_bookings: 1,
            busy: Some(false),
            ..Default::default()
        },
        (Active, NoShow) | (Active, Disputed) => CounterDelta {
            busy: Some(false),
            ..Default::default()
        },
        _ => CounterDelta::default(),
    }
}

/// Overlap check the store must repeat before committing a move into `to`.
///
/// New requests already claim their slot, so the committed check on Confirmed and Active
/// only fires for rows that were written without a guard.
pub fn conflict_guard(to: ReservationStatus) -> Option<ConflictScope> {
    match to {
        Pending => Some(ConflictScope::Claims),
        Confirmed | Active => Some(ConflictScope::Committed),
        _ => None,
    }
}

/// Validates a transition and turns it into the conditional write that applies it.
pub fn plan(
    reservation: &Reservation,
    target: ReservationStatus,
    actor: &Actor,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<StatusUpdate, AppError> {
    let edge = authorize(reservation, target, actor)?;

    Ok(StatusUpdate {
        reservation_id: reservation.id.clone(),
        expected: edge.from,
        change: StatusChange {
            status: edge.to,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            reason,
            at: now,
        },
        delta: side_effects(edge.from, edge.to),
        guard: conflict_guard(edge.to),
    })
}
