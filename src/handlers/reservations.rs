use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::AppError;
use crate::handlers::{actor_from_headers, check_auth};
use crate::models::{ActorRole, Page, PageRequest, Reservation, ReservationStatus, ServiceDetails};
use crate::services::reservation::{NewReservation, TransitionRequest};
use crate::state::AppState;

fn parse_status(s: &str) -> Result<ReservationStatus, AppError> {
    ReservationStatus::parse(s)
        .ok_or_else(|| AppError::Validation(format!("unknown reservation status: {s}")))
}

// POST /api/reservations
#[derive(Deserialize)]
pub struct CreateReservationRequest {
    pub provider_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub details: ServiceDetails,
    #[serde(default)]
    pub draft: bool,
}

pub async fn create_reservation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let actor = actor_from_headers(&headers)?;
    if actor.role != ActorRole::Requester {
        return Err(AppError::Forbidden(
            "only requesters can create reservations".to_string(),
        ));
    }

    let reservation = state
        .reservations
        .create_reservation(NewReservation {
            requester_id: actor.id,
            provider_id: body.provider_id,
            start: body.start,
            end: body.end,
            details: body.details,
            draft: body.draft,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(reservation)))
}

// GET /api/reservations
#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn list_reservations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Reservation>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let actor = actor_from_headers(&headers)?;

    let status = query.status.as_deref().map(parse_status).transpose()?;
    let page = PageRequest::new(
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(state.config.default_page_size),
    );

    let page = state
        .reservations
        .list_reservations(&actor, status, page)
        .await?;
    Ok(Json(page))
}

// GET /api/reservations/:id
pub async fn get_reservation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let actor = actor_from_headers(&headers)?;

    let reservation = state.reservations.get_reservation(&id, &actor).await?;
    Ok(Json(reservation))
}

// POST /api/reservations/:id/transitions
#[derive(Deserialize)]
pub struct TransitionBody {
    pub status: String,
    pub reason: Option<String>,
}

pub async fn transition_reservation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<Reservation>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let actor = actor_from_headers(&headers)?;
    let target = parse_status(&body.status)?;

    let reservation = state
        .reservations
        .transition_reservation(TransitionRequest {
            reservation_id: id,
            actor,
            target,
            reason: body.reason.filter(|r| !r.trim().is_empty()),
        })
        .await?;
    Ok(Json(reservation))
}
