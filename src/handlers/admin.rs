use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::errors::AppError;
use crate::handlers::check_auth;
use crate::models::ReservationStatus;
use crate::state::AppState;

// GET /api/admin/stats
#[derive(Serialize)]
pub struct StatsResponse {
    total: i64,
    by_status: BTreeMap<&'static str, i64>,
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let counts = state
        .store
        .status_counts(state.config.store_timeout())
        .await?;

    let mut by_status: BTreeMap<&'static str, i64> = ReservationStatus::ALL
        .iter()
        .map(|s| (s.as_str(), 0))
        .collect();
    for (status, count) in counts {
        by_status.insert(status.as_str(), count);
    }

    Ok(Json(StatsResponse {
        total: by_status.values().sum(),
        by_status,
    }))
}
