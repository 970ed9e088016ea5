//! `/slurm/*` passthrough routes — thin adapters over `RestClient` with no
//! Submitter/Registry involvement.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::error::ProxyError;
use crate::rest::payload::SubmitJobPayload;

#[derive(Deserialize)]
pub struct UsernameQuery {
    pub username: String,
}

pub async fn diag(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    Ok(Json(state.rest.diag(&query.username).await?))
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Path(update_time): Path<i64>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let jobs = state.rest.list_jobs(&query.username, update_time).await?;
    let body: Vec<_> = jobs
        .into_iter()
        .map(|j| serde_json::json!({ "job_id": j.job_id, "user": j.user, "state": j.state.as_str() }))
        .collect();
    Ok(Json(serde_json::json!({ "jobs": body })))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let live = state.rest.get_job(&query.username, id).await?;
    Ok(Json(
        live.map(|j| serde_json::json!({ "job_id": j.job_id, "user": j.user, "state": j.state.as_str() }))
            .unwrap_or(serde_json::Value::Null),
    ))
}

#[derive(Deserialize)]
pub struct SubmitPassthroughRequest {
    pub username: String,
    #[serde(flatten)]
    pub payload: SubmitJobPayload,
}

pub async fn submit_passthrough(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitPassthroughRequest>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let job_id = state.rest.submit(&body.username, &body.payload).await?;
    Ok(Json(serde_json::json!({ "job_id": job_id })))
}
