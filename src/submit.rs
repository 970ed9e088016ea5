//! Submitter — pre-flight validation and the two-phase submission
//! pipeline: Phase A (preliminary directory prep) must succeed before
//! Phase B (the main job) is attempted, and the registry row is only ever
//! written after both REST calls have returned a job id.

use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::catalog::{JobRecord, SlurmState, Task, TaskCatalog};
use crate::error::ProxyError;
use crate::notify::NotifierHub;
use crate::registry::Registry;
use crate::rest::payload::{define_task_cmd, main_payload, preliminary_payload};
use crate::rest::RestClient;
use crate::ssh::SshClient;

pub struct SubmitOutcome {
    pub uuid: String,
    pub slurm_job_id: i64,
}

pub struct Submitter<'a> {
    pub catalog: &'a TaskCatalog,
    pub rest: &'a RestClient,
    pub registry: &'a Registry,
    pub notifier: &'a NotifierHub,
    pub ssh: Option<&'a Arc<SshClient>>,
}

impl<'a> Submitter<'a> {
    pub fn new(
        catalog: &'a TaskCatalog,
        rest: &'a RestClient,
        registry: &'a Registry,
        notifier: &'a NotifierHub,
    ) -> Self {
        Submitter { catalog, rest, registry, notifier, ssh: None }
    }

    /// Same as [`Submitter::new`], but routes both submission phases over
    /// the SSH fallback transport instead of the SLURM REST API.
    pub fn with_ssh(
        catalog: &'a TaskCatalog,
        rest: &'a RestClient,
        registry: &'a Registry,
        notifier: &'a NotifierHub,
        ssh: &'a Arc<SshClient>,
    ) -> Self {
        Submitter { catalog, rest, registry, notifier, ssh: Some(ssh) }
    }

    fn validate(&self, task: &Task) -> Result<(), ProxyError> {
        if task.uuid.trim().is_empty() {
            return Err(ProxyError::Validation("task.uuid is required".to_string()));
        }
        if task.username.trim().is_empty() {
            return Err(ProxyError::Validation("task.username is required".to_string()));
        }
        if task.cwd.trim().is_empty() {
            return Err(ProxyError::Validation("task.cwd is required".to_string()));
        }
        if !self.catalog.contains(&task.name) {
            return Err(ProxyError::Validation(format!("unknown task name: {}", task.name)));
        }
        if self.registry.contains_uuid(&task.uuid)? {
            return Err(ProxyError::Duplicate(format!("task uuid {} already registered", task.uuid)));
        }
        Ok(())
    }

    /// Validate, run Phase A then Phase B, and (only on full success) write
    /// the `JobRecord`. If the record is already terminal the instant it's
    /// written (SLURM ran it synchronously), fire the notification
    /// immediately rather than waiting for the next Poller tick.
    pub async fn submit(&self, task: Task) -> Result<SubmitOutcome, ProxyError> {
        self.validate(&task)?;

        let (main_job_id, initial_state) = match self.ssh {
            Some(ssh) => self.submit_over_ssh(ssh.clone(), &task).await?,
            None => self.submit_over_rest(&task).await?,
        };

        let now = Utc::now();

        let record = JobRecord {
            slurm_job_id: main_job_id,
            slurm_username: task.username.clone(),
            slurm_job_state: initial_state,
            task: task.clone(),
            created_at: now,
            updated_at: now,
        };
        self.registry.upsert(&record)?;

        if initial_state.is_terminal() {
            self.notifier.dispatch(&record, initial_state).await;
        }

        Ok(SubmitOutcome { uuid: task.uuid, slurm_job_id: main_job_id })
    }

    async fn submit_over_rest(&self, task: &Task) -> Result<(i64, SlurmState), ProxyError> {
        let preliminary = preliminary_payload(task)?;
        let preliminary_job_id = self.rest.submit(&task.username, &preliminary).await?;
        info!("submitted preliminary job {preliminary_job_id} for task {}", task.uuid);

        let main = main_payload(self.catalog, task, preliminary_job_id)?;
        let main_job_id = self.rest.submit(&task.username, &main).await?;
        info!("submitted main job {main_job_id} for task {}", task.uuid);

        let live = self.rest.get_job(&task.username, main_job_id).await.ok().flatten();
        Ok((main_job_id, live.map(|j| j.state).unwrap_or(SlurmState::Unknown)))
    }

    async fn submit_over_ssh(&self, ssh: Arc<SshClient>, task: &Task) -> Result<(i64, SlurmState), ProxyError> {
        let dirs = &task.dirs;
        let mkdir_cmd = format!(
            "mkdir -p {} ; mkdir -p {} ; mkdir -p {} ; mkdir -p {}",
            dirs.parent, dirs.input, dirs.output, dirs.error
        );
        let preliminary_job_id = ssh
            .clone()
            .sbatch(
                format!("hpc-proxy-preliminary-{}-{}-preliminary", task.name, task.uuid),
                "/dev/null".to_string(),
                "/dev/null".to_string(),
                vec![mkdir_cmd],
                None,
            )
            .await?;
        info!("submitted preliminary job {preliminary_job_id} for task {} over ssh", task.uuid);

        let task_cmd = define_task_cmd(self.catalog, task)?;
        let main_job_id = ssh
            .sbatch(
                format!("hpc-proxy-{}-{}-main", task.name, task.uuid),
                format!("{}/{}", task.dirs.output, task.slurm.output),
                format!("{}/{}", task.dirs.error, task.slurm.error),
                vec![task_cmd],
                Some(preliminary_job_id),
            )
            .await?;
        info!("submitted main job {main_job_id} for task {} over ssh", task.uuid);

        Ok((main_job_id, SlurmState::Unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{default_catalog, TaskDirs, TaskSlurm};
    use crate::notify::NotifierHub;
    use crate::token::TokenMinter;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn minter() -> Arc<TokenMinter> {
        use base64::Engine;
        let secret = base64::engine::general_purpose::STANDARD.encode(b"submit-tests");
        Arc::new(TokenMinter::new(&secret, 10).unwrap())
    }

    fn sample_task(uuid: &str) -> Task {
        Task {
            uuid: uuid.to_string(),
            username: "alice".to_string(),
            name: "echo_hello_world".to_string(),
            cmd: None,
            params: vec![],
            cwd: "/h/a".to_string(),
            dirs: TaskDirs {
                parent: "/h/a/p".to_string(),
                input: "/h/a/i".to_string(),
                output: "/h/a/o".to_string(),
                error: "/h/a/e".to_string(),
            },
            slurm: TaskSlurm {
                partition: "q".to_string(),
                cpus_per_task: 1,
                mem: 100,
                time: 60,
                nodes: 1,
                ntasks_per_node: 1,
                output: "o.txt".to_string(),
                error: "e.txt".to_string(),
                job_name: "j".to_string(),
                environment: None,
            },
            notification: None,
        }
    }

    async fn mock_slurm(server: &MockServer, preliminary_id: i64, main_id: i64) {
        Mock::given(method("POST"))
            .and(path("/slurm/v0.0.42/job/submit/"))
            .respond_with(move |req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                let name = body["job"]["name"].as_str().unwrap_or("");
                let id = if name.contains("preliminary") { preliminary_id } else { main_id };
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "job_id": id, "errors": [] }))
            })
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/slurmdb/v0.0.42/job/{main_id}/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jobs": [{ "job_id": main_id, "user": "alice", "state": { "current": ["PENDING"] } }]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn happy_path_writes_record_with_afterok_dependency() {
        let server = MockServer::start().await;
        mock_slurm(&server, 1001, 1002).await;

        let rest = RestClient::new_for_test(
            format!("{}/slurm/v0.0.42", server.uri()),
            format!("{}/slurmdb/v0.0.42", server.uri()),
            minter(),
        );
        let registry = Registry::open_in_memory().unwrap();
        let notifier = NotifierHub::new_test_only();
        let catalog = default_catalog();
        let submitter = Submitter::new(catalog, &rest, &registry, &notifier);

        let outcome = submitter.submit(sample_task("u1")).await.unwrap();
        assert_eq!(outcome.uuid, "u1");
        assert_eq!(outcome.slurm_job_id, 1002);

        let record = registry.find_by_uuid("u1").unwrap().unwrap();
        assert_eq!(record.slurm_job_id, 1002);
    }

    #[tokio::test]
    async fn duplicate_uuid_is_rejected_without_rest_calls() {
        let server = MockServer::start().await;
        mock_slurm(&server, 1001, 1002).await;

        let rest = RestClient::new_for_test(
            format!("{}/slurm/v0.0.42", server.uri()),
            format!("{}/slurmdb/v0.0.42", server.uri()),
            minter(),
        );
        let registry = Registry::open_in_memory().unwrap();
        let notifier = NotifierHub::new_test_only();
        let catalog = default_catalog();
        let submitter = Submitter::new(catalog, &rest, &registry, &notifier);

        submitter.submit(sample_task("u1")).await.unwrap();
        let err = submitter.submit(sample_task("u1")).await.unwrap_err();
        assert!(matches!(err, ProxyError::Duplicate(_)));

        // Registry size unchanged beyond the first insert.
        assert!(registry.find_by_uuid("u1").is_ok());
    }

    #[tokio::test]
    async fn unknown_task_name_is_rejected_before_any_rest_call() {
        let server = MockServer::start().await;
        // No mocks registered: any attempted call would fail the test via
        // wiremock's unmatched-request panic in strict mode, but since we
        // don't mount any handler a call would 404 rather than panic; the
        // assertion below is the real check.
        let rest = RestClient::new_for_test(
            format!("{}/slurm/v0.0.42", server.uri()),
            format!("{}/slurmdb/v0.0.42", server.uri()),
            minter(),
        );
        let registry = Registry::open_in_memory().unwrap();
        let notifier = NotifierHub::new_test_only();
        let catalog = default_catalog();
        let submitter = Submitter::new(catalog, &rest, &registry, &notifier);

        let mut task = sample_task("u2");
        task.name = "does_not_exist".to_string();
        let err = submitter.submit(task).await.unwrap_err();
        assert!(matches!(err, ProxyError::Validation(_)));
    }
}
