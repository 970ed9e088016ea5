use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::catalog::{JobRecord, SlurmState, Task};
use crate::error::ProxyError;
use crate::submit::Submitter;

#[derive(Deserialize)]
pub struct CreateMonitorRequest {
    pub monitor: MonitorPayload,
}

#[derive(Deserialize)]
pub struct MonitorPayload {
    pub slurm_job_id: Option<i64>,
    pub task: Task,
}

#[derive(Deserialize)]
pub struct UsernameQuery {
    pub username: Option<String>,
}

#[derive(Serialize)]
pub struct MonitorResponse {
    pub slurm: serde_json::Value,
    pub monitor: JobRecord,
}

#[derive(Serialize)]
pub struct JobsListResponse {
    pub jobs: Vec<JobRecord>,
}

/// `POST /monitor/`: an explicit create, distinct from `/submit/` — used
/// when a caller already has a SLURM job id from the SSH fallback path and
/// only needs the registry row created.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateMonitorRequest>,
) -> Result<Json<JobRecord>, ProxyError> {
    match body.monitor.slurm_job_id {
        Some(slurm_job_id) => {
            let now = chrono::Utc::now();
            let record = JobRecord {
                slurm_job_id,
                slurm_username: body.monitor.task.username.clone(),
                slurm_job_state: SlurmState::Unknown,
                task: body.monitor.task,
                created_at: now,
                updated_at: now,
            };
            state.registry.upsert(&record)?;
            Ok(Json(record))
        }
        None => {
            let submitter = match &state.ssh {
                Some(ssh) => Submitter::with_ssh(state.catalog, &state.rest, &state.registry, &state.notifier, ssh),
                None => Submitter::new(state.catalog, &state.rest, &state.registry, &state.notifier),
            };
            let outcome = submitter.submit(body.monitor.task).await?;
            let record = state
                .registry
                .find_by_job_id(outcome.slurm_job_id)?
                .ok_or(ProxyError::NotFound)?;
            Ok(Json(record))
        }
    }
}

pub async fn get_by_job_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<MonitorResponse>, ProxyError> {
    let record = state.registry.find_by_job_id(id)?.ok_or(ProxyError::NotFound)?;
    let username = query.username.unwrap_or_else(|| record.slurm_username.clone());
    let live = state.rest.get_job(&username, id).await?;
    let slurm = live
        .map(|j| serde_json::json!({ "job_id": j.job_id, "user": j.user, "state": j.state.as_str() }))
        .unwrap_or(serde_json::Value::Null);
    Ok(Json(MonitorResponse { slurm, monitor: record }))
}

pub async fn get_by_uuid(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<MonitorResponse>, ProxyError> {
    let record = state.registry.find_by_uuid(&uuid)?.ok_or(ProxyError::NotFound)?;
    let live = state.rest.get_job(&record.slurm_username, record.slurm_job_id).await?;
    let slurm = live
        .map(|j| serde_json::json!({ "job_id": j.job_id, "user": j.user, "state": j.state.as_str() }))
        .unwrap_or(serde_json::Value::Null);
    Ok(Json(MonitorResponse { slurm, monitor: record }))
}

pub async fn list_by_state(
    State(state): State<Arc<AppState>>,
    Path(state_str): Path<String>,
) -> Result<Json<JobsListResponse>, ProxyError> {
    let normalised = SlurmState::normalise(&state_str.to_uppercase());
    if normalised == SlurmState::Unknown && state_str.to_uppercase() != "UNKNOWN" {
        return Err(ProxyError::Validation(format!("invalid slurm job state: {state_str}")));
    }
    let jobs = state.registry.list_by_state(normalised)?;
    Ok(Json(JobsListResponse { jobs }))
}

/// `DELETE /monitor/slurm_job_id/<id>`: issues `scancel` then deletes the
/// registry row. 404 (no SLURM call) if the id isn't registered.
pub async fn delete_by_job_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<JobRecord>, ProxyError> {
    let record = state.registry.find_by_job_id(id)?.ok_or(ProxyError::NotFound)?;
    match &state.ssh {
        Some(ssh) => ssh.clone().scancel(id).await?,
        None => state.rest.scancel(&record.slurm_username, id).await?,
    }
    let deleted = state.registry.delete(id)?.ok_or(ProxyError::NotFound)?;
    Ok(Json(deleted))
}
