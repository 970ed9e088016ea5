//! Structured error kinds shared by every core component.
//!
//! The HTTP facade (`http/`) translates a [`ProxyError`] into a JSON body of
//! the form `{"error": "<message>"}` with the status code named in each
//! variant's doc comment below. The Poller instead matches on the variant
//! directly and never lets one propagate past a single tick.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Task missing required keys, unknown `task.name`, unresolved command,
    /// invalid state parameter. 400. Never contacts SLURM.
    #[error("{0}")]
    Validation(String),

    /// `task.uuid` or `slurm_job_id` already present in the registry. 400.
    #[error("{0}")]
    Duplicate(String),

    /// Cannot mint a JWT (secret missing or malformed). 400.
    #[error("{0}")]
    Auth(String),

    /// Non-200 response from the SLURM REST API with a structured
    /// `errors[0]` body.
    #[error("SLURM REST error {error_number}: {description}")]
    SlurmRest { error_number: i64, description: String },

    /// Network/connection failure talking to SLURM or a notifier transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Registry backend unavailable or a write failed unexpectedly.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Lookup found nothing. 404.
    #[error("not found")]
    NotFound,
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Transport(err.to_string())
    }
}

impl From<rusqlite::Error> for ProxyError {
    fn from(err: rusqlite::Error) -> Self {
        ProxyError::Persistence(err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::Duplicate(_) => StatusCode::BAD_REQUEST,
            ProxyError::Auth(_) => StatusCode::BAD_REQUEST,
            ProxyError::SlurmRest { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Transport(_) => StatusCode::BAD_REQUEST,
            ProxyError::Persistence(_) => StatusCode::BAD_REQUEST,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
