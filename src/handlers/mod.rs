pub mod admin;
pub mod health;
pub mod providers;
pub mod reservations;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::models::{Actor, ActorRole};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/reservations",
            post(reservations::create_reservation).get(reservations::list_reservations),
        )
        .route("/api/reservations/:id", get(reservations::get_reservation))
        .route(
            "/api/reservations/:id/transitions",
            post(reservations::transition_reservation),
        )
        .route(
            "/api/providers/:id",
            get(providers::get_provider).put(providers::upsert_provider),
        )
        .route("/api/admin/stats", get(admin::get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Service-to-service bearer token shared with the request-handling layers in front of us.
fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The caller identity forwarded by the fronting layer in `x-actor-id` / `x-actor-role`.
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let id = header(headers, "x-actor-id")
        .ok_or_else(|| AppError::Validation("x-actor-id header is required".to_string()))?;
    let role = header(headers, "x-actor-role")
        .ok_or_else(|| AppError::Validation("x-actor-role header is required".to_string()))?;
    let role = ActorRole::parse(role)
        .ok_or_else(|| AppError::Validation(format!("unknown actor role: {role}")))?;

    Ok(Actor::new(id, role))
}
