use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use rusqlite::ErrorCode;

use crate::models::ReservationStatus;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider is busy until {}", fmt_next_available(.next_available_at))]
    ProviderBusy {
        next_available_at: Option<DateTime<Utc>>,
    },

    #[error("the requested window overlaps an existing commitment")]
    SchedulingConflict,

    #[error("cannot move reservation from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("reservation was modified concurrently, reload and retry")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(rusqlite::Error),
}

fn fmt_next_available(at: &Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "further notice".to_string())
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                AppError::Unavailable(err.to_string())
            }
            _ => AppError::Database(err),
        }
    }
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::ProviderBusy { .. } => "provider_busy",
            AppError::SchedulingConflict => "scheduling_conflict",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict => "conflict",
            AppError::Unavailable(_) => "unavailable",
            AppError::Unauthorized => "unauthorized",
            AppError::Database(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ProviderBusy { .. } => StatusCode::CONFLICT,
            AppError::SchedulingConflict => StatusCode::CONFLICT,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let AppError::Database(e) = &self {
            tracing::error!(error = %e, "unexpected store failure");
        }

        let mut body = serde_json::json!({ "kind": self.kind(), "error": self.to_string() });
        if let AppError::ProviderBusy { next_available_at } = &self {
            body["next_available_at"] = serde_json::json!(next_available_at);
        }
        (status, axum::Json(body)).into_response()
    }
}
