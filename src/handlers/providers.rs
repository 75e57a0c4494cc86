use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::handlers::check_auth;
use crate::models::{Provider, MAX_HOURLY_RATE_CENTS};
use crate::services::store::ProviderDirectory;
use crate::state::AppState;

// GET /api/providers/:id
pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Provider>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let provider = state
        .store
        .get_provider(&id, state.config.store_timeout())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("provider {id}")))?;
    Ok(Json(provider))
}

// PUT /api/providers/:id
#[derive(Deserialize)]
pub struct UpsertProviderRequest {
    pub display_name: String,
    pub hourly_rate_cents: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

pub async fn upsert_provider(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpsertProviderRequest>,
) -> Result<Json<Provider>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if !(0..=MAX_HOURLY_RATE_CENTS).contains(&body.hourly_rate_cents) {
        return Err(AppError::Validation(format!(
            "hourly_rate_cents must be between 0 and {MAX_HOURLY_RATE_CENTS}"
        )));
    }

    let provider = state
        .store
        .upsert_provider(
            id,
            body.display_name,
            body.hourly_rate_cents,
            body.is_active,
            state.config.store_timeout(),
        )
        .await?;
    tracing::info!(provider_id = %provider.id, active = provider.is_active, "provider saved");
    Ok(Json(provider))
}
