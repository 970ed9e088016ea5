//! RestClient — typed GET/POST against SLURM's `slurm/vX` and
//! `slurmdb/vX` REST endpoints, injecting a fresh per-call user token.

pub mod payload;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::SlurmState;
use crate::error::ProxyError;
use crate::token::TokenMinter;
use payload::SubmitJobPayload;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct SlurmRestApiError {
    #[serde(default)]
    pub error_number: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponseBody {
    #[serde(default)]
    job_id: Option<i64>,
    #[serde(default)]
    errors: Vec<SlurmRestApiError>,
}

#[derive(Debug, Deserialize)]
struct JobStateWrapper {
    #[serde(default)]
    current: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SlurmdbJob {
    job_id: i64,
    #[serde(default)]
    user: String,
    state: JobStateWrapper,
}

#[derive(Debug, Deserialize)]
struct SlurmdbJobsResponse {
    #[serde(default)]
    jobs: Vec<SlurmdbJob>,
    #[serde(default)]
    errors: Vec<SlurmRestApiError>,
}

/// The live state of a job as last reported by SLURM.
#[derive(Debug, Clone)]
pub struct LiveJob {
    pub job_id: i64,
    pub user: String,
    pub state: SlurmState,
}

pub struct RestClient {
    http: reqwest::Client,
    minter: Arc<TokenMinter>,
    slurm_base: String,
    slurmdb_base: String,
}

impl RestClient {
    pub fn new(host: &str, data_parser_version: &str, minter: Arc<TokenMinter>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        RestClient {
            http,
            minter,
            slurm_base: format!("{host}/slurm/v{data_parser_version}"),
            slurmdb_base: format!("{host}/slurmdb/v{data_parser_version}"),
        }
    }

    #[cfg(test)]
    fn new_for_test(slurm_base: String, slurmdb_base: String, minter: Arc<TokenMinter>) -> Self {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap();
        RestClient { http, minter, slurm_base, slurmdb_base }
    }

    fn token_for(&self, username: &str) -> Result<String, ProxyError> {
        self.minter.mint(username)
    }

    async fn first_error(resp: reqwest::Response) -> ProxyError {
        let status = resp.status();
        match resp.json::<SubmitResponseBody>().await {
            Ok(body) if !body.errors.is_empty() => ProxyError::SlurmRest {
                error_number: body.errors[0].error_number,
                description: body.errors[0].description.clone(),
            },
            _ => ProxyError::SlurmRest {
                error_number: status.as_u16() as i64,
                description: format!("SLURM REST call failed with status {status}"),
            },
        }
    }

    /// `GET slurm/.../diag/`
    pub async fn diag(&self, username: &str) -> Result<serde_json::Value, ProxyError> {
        let token = self.token_for(username)?;
        let url = format!("{}/diag/", self.slurm_base);
        let resp = self
            .http
            .get(&url)
            .header("X-SLURM-USER-TOKEN", token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::first_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// `GET slurmdb/.../jobs/?update_time=...`
    pub async fn list_jobs(&self, username: &str, update_time: i64) -> Result<Vec<LiveJob>, ProxyError> {
        let token = self.token_for(username)?;
        let url = format!("{}/jobs/", self.slurmdb_base);
        let resp = self
            .http
            .get(&url)
            .query(&[("update_time", update_time.to_string())])
            .header("X-SLURM-USER-TOKEN", token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::first_error(resp).await);
        }
        let body: SlurmdbJobsResponse = resp.json().await?;
        Ok(body
            .jobs
            .into_iter()
            .map(|j| LiveJob {
                job_id: j.job_id,
                user: j.user,
                state: j.state.current.first().map(|s| SlurmState::normalise(s)).unwrap_or(SlurmState::Unknown),
            })
            .collect())
    }

    /// `GET slurmdb/.../job/<id>/`. Returns `Ok(None)` if SLURM has no
    /// record of the job (treated as a transient miss by the Poller).
    pub async fn get_job(&self, username: &str, slurm_job_id: i64) -> Result<Option<LiveJob>, ProxyError> {
        let token = self.token_for(username)?;
        let url = format!("{}/job/{}/", self.slurmdb_base, slurm_job_id);
        let resp = self
            .http
            .get(&url)
            .header("X-SLURM-USER-TOKEN", token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::first_error(resp).await);
        }
        let body: SlurmdbJobsResponse = resp.json().await?;
        Ok(body.jobs.into_iter().next().map(|j| LiveJob {
            job_id: j.job_id,
            user: j.user,
            state: j.state.current.first().map(|s| SlurmState::normalise(s)).unwrap_or(SlurmState::Unknown),
        }))
    }

    /// `POST slurm/.../job/submit/`
    pub async fn submit(&self, username: &str, payload: &SubmitJobPayload) -> Result<i64, ProxyError> {
        let token = self.token_for(username)?;
        let url = format!("{}/job/submit/", self.slurm_base);
        let resp = self
            .http
            .post(&url)
            .header("X-SLURM-USER-TOKEN", token)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::first_error(resp).await);
        }
        let body: SubmitResponseBody = resp.json().await?;
        match body.job_id {
            Some(id) => Ok(id),
            None if !body.errors.is_empty() => Err(ProxyError::SlurmRest {
                error_number: body.errors[0].error_number,
                description: body.errors[0].description.clone(),
            }),
            None => Err(ProxyError::SlurmRest {
                error_number: -1,
                description: "SLURM submit response had no job_id".to_string(),
            }),
        }
    }

    /// `DELETE slurm/.../job/<id>/` — backs `DELETE /monitor/slurm_job_id/<id>`.
    pub async fn scancel(&self, username: &str, slurm_job_id: i64) -> Result<(), ProxyError> {
        let token = self.token_for(username)?;
        let url = format!("{}/job/{}/", self.slurm_base, slurm_job_id);
        let resp = self
            .http
            .delete(&url)
            .header("X-SLURM-USER-TOKEN", token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::first_error(resp).await);
        }
        Ok(())
    }
}
