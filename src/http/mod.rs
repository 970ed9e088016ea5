//! Thin axum request/response adapter over the core components.

mod monitor;
mod slurm;
mod submit;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::catalog::TaskCatalog;
use crate::notify::NotifierHub;
use crate::registry::Registry;
use crate::rest::RestClient;
use crate::ssh::SshClient;

pub struct AppState {
    pub catalog: &'static TaskCatalog,
    pub rest: Arc<RestClient>,
    pub registry: Arc<Registry>,
    pub notifier: Arc<NotifierHub>,
    pub ssh: Option<Arc<SshClient>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/submit/", post(submit::submit))
        .route("/monitor/", post(monitor::create))
        .route("/monitor/slurm_job_id/:id", get(monitor::get_by_job_id).delete(monitor::delete_by_job_id))
        .route("/monitor/task_uuid/:uuid", get(monitor::get_by_uuid))
        .route("/monitor/slurm_job_state/:state", get(monitor::list_by_state))
        .route("/slurm/diag/", get(slurm::diag))
        .route("/slurm/jobs/:update_time", get(slurm::list_jobs))
        .route("/slurm/job/:id/", get(slurm::get_job))
        .route("/slurm/job/submit/", post(slurm::submit_passthrough))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::catalog::default_catalog;
    use crate::token::TokenMinter;

    fn test_state() -> Arc<AppState> {
        use base64::Engine;
        let secret = base64::engine::general_purpose::STANDARD.encode(b"http-tests");
        let minter = Arc::new(TokenMinter::new(&secret, 10).unwrap());
        Arc::new(AppState {
            catalog: default_catalog(),
            rest: Arc::new(RestClient::new("https://slurm.invalid", "0.0.42", minter)),
            registry: Arc::new(Registry::open_in_memory().unwrap()),
            notifier: Arc::new(NotifierHub::new_test_only()),
            ssh: None,
        })
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_job_id_is_404() {
        let app = router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/monitor/slurm_job_id/9999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
