use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::catalog::Task;
use crate::error::ProxyError;
use crate::schema::validate_submit_body;
use crate::submit::Submitter;

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub task: Task,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub uuid: String,
    pub slurm_job_id: i64,
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<serde_json::Value>,
) -> Result<Json<SubmitResponse>, ProxyError> {
    validate_submit_body(&raw)?;
    let body: SubmitRequest = serde_json::from_value(raw)
        .map_err(|e| ProxyError::Validation(format!("malformed task body: {e}")))?;

    let submitter = match &state.ssh {
        Some(ssh) => Submitter::with_ssh(state.catalog, &state.rest, &state.registry, &state.notifier, ssh),
        None => Submitter::new(state.catalog, &state.rest, &state.registry, &state.notifier),
    };
    let outcome = submitter.submit(body.task).await?;
    Ok(Json(SubmitResponse { uuid: outcome.uuid, slurm_job_id: outcome.slurm_job_id }))
}
