//! Poller — the background reconciliation state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::time::MissedTickBehavior;

use crate::catalog::SlurmState;
use crate::error::ProxyError;
use crate::notify::NotifierHub;
use crate::registry::Registry;
use crate::rest::RestClient;
use crate::ssh::SshClient;

pub struct Poller {
    registry: Arc<Registry>,
    rest: Arc<RestClient>,
    notifier: Arc<NotifierHub>,
    ssh: Option<Arc<SshClient>>,
    max_age_minutes: i64,
    interval_minutes: u64,
}

impl Poller {
    pub fn new(
        registry: Arc<Registry>,
        rest: Arc<RestClient>,
        notifier: Arc<NotifierHub>,
        interval_minutes: u64,
        max_age_minutes: i64,
    ) -> Self {
        Poller { registry, rest, notifier, ssh: None, max_age_minutes, interval_minutes }
    }

    /// Same reconciliation loop, but looks up live job state with `sacct`
    /// over SSH instead of the SLURM REST API.
    pub fn with_ssh(
        registry: Arc<Registry>,
        rest: Arc<RestClient>,
        notifier: Arc<NotifierHub>,
        ssh: Arc<SshClient>,
        interval_minutes: u64,
        max_age_minutes: i64,
    ) -> Self {
        Poller { registry, rest, notifier, ssh: Some(ssh), max_age_minutes, interval_minutes }
    }

    /// Runs forever on a fixed interval. `MissedTickBehavior::Delay`
    /// coalesces a missed tick into the next one instead of bursting
    /// catch-up ticks, and `interval.tick()` cannot itself be called
    /// concurrently within this loop, giving the single-instance
    /// guarantee the reconciliation loop needs.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_minutes.max(1) * 60));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One reconciliation pass, exposed separately so tests can drive it
    /// deterministically instead of waiting on a real ticker.
    pub async fn tick(&self) {
        let now = Utc::now();
        let min = now - chrono::Duration::minutes(self.max_age_minutes);
        let records = match self.registry.scan(min, now) {
            Ok(records) => records,
            Err(e) => {
                warn!("poller tick abandoned: registry scan failed: {e}");
                return;
            }
        };

        for record in records {
            if record.slurm_job_state.is_terminal() {
                continue;
            }

            let live = match self.lookup_live(&record.slurm_username, record.slurm_job_id).await {
                Ok(live) => live,
                Err(e) => {
                    warn!("poller: lookup failed for job {}: {e}", record.slurm_job_id);
                    continue;
                }
            };
            let Some((live_user, new_state)) = live else {
                continue;
            };

            if live_user != record.slurm_username {
                warn!(
                    "poller: job {} reported by SLURM under user {} but registry has {}",
                    record.slurm_job_id, live_user, record.slurm_username
                );
            }

            if new_state == record.slurm_job_state {
                continue;
            }

            if new_state.is_terminal() {
                info!("job {} transitioned to terminal state {new_state}", record.slurm_job_id);
                self.notifier.dispatch(&record, new_state).await;
            }

            if let Err(e) = self.registry.update_state(record.slurm_job_id, new_state) {
                warn!("poller: failed to persist state transition for job {}: {e}", record.slurm_job_id);
            }
        }
    }

    async fn lookup_live(&self, username: &str, slurm_job_id: i64) -> Result<Option<(String, SlurmState)>, ProxyError> {
        match &self.ssh {
            Some(ssh) => {
                let raw = ssh.clone().sacct(slurm_job_id).await?;
                Ok(raw.map(|(_, state, user)| (user, SlurmState::normalise(&state))))
            }
            None => {
                let live = self.rest.get_job(username, slurm_job_id).await?;
                Ok(live.map(|j| (j.user, j.state)))
            }
        }
    }
}
