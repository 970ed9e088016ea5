//! NotifierHub — polymorphic, best-effort dispatch across
//! `{EMAIL, GMAIL, SLACK, RABBITMQ, TEST}`.

mod email;
mod gmail;
mod rabbitmq;
mod slack;
mod test_sink;

use async_trait::async_trait;
use log::{error, warn};
use regex::Regex;
use std::sync::OnceLock;

use crate::catalog::{JobRecord, NotificationMethod, NotificationPolicy, SlurmState};
use crate::config::Config;

/// The argument shape a concrete transport receives, already validated by
/// the hub per that transport's field contract.
#[derive(Debug, Clone)]
pub enum NotifyArgs {
    Email { sender: String, recipient: String, subject: String, body: String },
    Slack { message: String, channel: String },
    Rabbitmq { queue: String, exchange: String, routing_key: String, body: String },
    Test { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid notifier arguments: {0}")]
    InvalidArgs(String),
    #[error("notifier transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, args: &NotifyArgs) -> Result<(), NotifyError>;
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\S+@\S+\.\S+$").unwrap())
}

fn terminal_message(record: &JobRecord, new_state: SlurmState) -> String {
    format!(
        "Task {} ({}) for user {} reached terminal state {}",
        record.task.name, record.task.uuid, record.slurm_username, new_state
    )
}

/// Owns one concrete `Notifier` per method and fans out a terminal-state
/// transition across whichever methods the effective policy names. A
/// failure in one method is logged and does not stop the others —
/// Non-goal: no at-least-once delivery guarantee for notifications.
pub struct NotifierHub {
    email: Option<Box<dyn Notifier>>,
    gmail: Option<Box<dyn Notifier>>,
    slack: Option<Box<dyn Notifier>>,
    rabbitmq: Option<Box<dyn Notifier>>,
    test: Box<dyn Notifier>,
}

impl NotifierHub {
    pub fn from_config(config: &Config) -> Self {
        NotifierHub {
            email: Some(Box::new(email::EmailNotifier::from_config(config))),
            gmail: Some(Box::new(gmail::GmailNotifier::from_config(config))),
            slack: Some(Box::new(slack::SlackNotifier::from_config(config))),
            rabbitmq: Some(Box::new(rabbitmq::RabbitmqNotifier::from_config(config))),
            test: Box::new(test_sink::TestNotifier),
        }
    }

    /// A hub wired only with the TEST sink and no-op stand-ins, for use in
    /// Submitter/Poller tests where email/Slack/AMQP transports aren't the
    /// point of the test.
    #[cfg(test)]
    pub fn new_test_only() -> Self {
        NotifierHub {
            email: None,
            gmail: None,
            slack: None,
            rabbitmq: None,
            test: Box::new(test_sink::TestNotifier),
        }
    }

    fn dispatch_one(&self, method: NotificationMethod) -> Option<&dyn Notifier> {
        match method {
            NotificationMethod::Email => self.email.as_deref(),
            NotificationMethod::Gmail => self.gmail.as_deref(),
            NotificationMethod::Slack => self.slack.as_deref(),
            NotificationMethod::Rabbitmq => self.rabbitmq.as_deref(),
            NotificationMethod::Test => Some(self.test.as_ref()),
        }
    }

    fn build_args(&self, method: NotificationMethod, record: &JobRecord, new_state: SlurmState) -> Result<NotifyArgs, NotifyError> {
        let policy = &record.task.notification;
        let params = &policy.as_ref().map(|p| p.params.clone()).unwrap_or_default();

        match method {
            NotificationMethod::Email | NotificationMethod::Gmail => {
                let p = params
                    .email
                    .as_ref()
                    .ok_or_else(|| NotifyError::InvalidArgs("missing email params".to_string()))?;
                if !email_re().is_match(&p.sender) || !email_re().is_match(&p.recipient) {
                    return Err(NotifyError::InvalidArgs("malformed sender/recipient address".to_string()));
                }
                if p.subject.trim().is_empty() {
                    return Err(NotifyError::InvalidArgs("empty subject".to_string()));
                }
                let body = p.body.clone().unwrap_or_else(|| terminal_message(record, new_state));
                if body.trim().is_empty() {
                    return Err(NotifyError::InvalidArgs("empty body".to_string()));
                }
                Ok(NotifyArgs::Email {
                    sender: p.sender.clone(),
                    recipient: p.recipient.clone(),
                    subject: p.subject.clone(),
                    body,
                })
            }
            NotificationMethod::Slack => {
                let p = params
                    .slack
                    .as_ref()
                    .ok_or_else(|| NotifyError::InvalidArgs("missing slack params".to_string()))?;
                let message = terminal_message(record, new_state);
                if message.trim().is_empty() {
                    return Err(NotifyError::InvalidArgs("empty message".to_string()));
                }
                Ok(NotifyArgs::Slack { message, channel: p.channel.clone() })
            }
            NotificationMethod::Rabbitmq => {
                let p = params
                    .rabbitmq
                    .as_ref()
                    .ok_or_else(|| NotifyError::InvalidArgs("missing rabbitmq params".to_string()))?;
                Ok(NotifyArgs::Rabbitmq {
                    queue: p.queue.clone(),
                    exchange: p.exchange.clone(),
                    routing_key: p.routing_key.clone(),
                    body: terminal_message(record, new_state),
                })
            }
            NotificationMethod::Test => Ok(NotifyArgs::Test { message: terminal_message(record, new_state) }),
        }
    }

    /// `dispatch(record, new_state)`: merges the record's effective policy,
    /// then invokes one `Notifier` per method. Best-effort: logs and moves
    /// on past individual failures.
    pub async fn dispatch(&self, record: &JobRecord, new_state: SlurmState) {
        let catalog = crate::catalog::default_catalog();
        let default_policy = catalog
            .get(&record.task.name)
            .map(|d| d.notification.clone())
            .unwrap_or_default();
        let effective = NotificationPolicy::merge(&default_policy, record.task.notification.as_ref());

        for method in &effective.methods {
            let Some(notifier) = self.dispatch_one(*method) else {
                error!("no notifier configured for method {method:?}, skipping job {}", record.slurm_job_id);
                continue;
            };
            let args = match self.build_args(*method, record, new_state) {
                Ok(args) => args,
                Err(e) => {
                    warn!("skipping {method:?} notification for job {}: {e}", record.slurm_job_id);
                    continue;
                }
            };
            if let Err(e) = notifier.notify(&args).await {
                warn!("{method:?} notification failed for job {}: {e}", record.slurm_job_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EmailParams, NotificationParams, RabbitMqParams, SlackParams, TaskDirs, TaskSlurm};
    use crate::catalog::Task;
    use chrono::Utc;

    fn record_with_policy(policy: Option<NotificationPolicy>) -> JobRecord {
        JobRecord {
            slurm_job_id: 1002,
            slurm_username: "alice".to_string(),
            slurm_job_state: SlurmState::Completed,
            task: Task {
                uuid: "u1".to_string(),
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
                notification: policy,
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_uses_test_sink_without_panicking() {
        let hub = NotifierHub::new_test_only();
        let record = record_with_policy(None);
        hub.dispatch(&record, SlurmState::Completed).await;
    }

    #[tokio::test]
    async fn missing_configured_notifier_is_logged_and_skipped() {
        let hub = NotifierHub::new_test_only();
        let policy = NotificationPolicy {
            methods: vec![NotificationMethod::Slack, NotificationMethod::Test],
            params: NotificationParams {
                slack: Some(SlackParams { channel: "general".to_string() }),
                ..Default::default()
            },
        };
        let record = record_with_policy(Some(policy));
        // email/slack/rabbitmq are None in new_test_only(); this must not
        // panic even though SLACK is in the method list.
        hub.dispatch(&record, SlurmState::Completed).await;
    }

    #[test]
    fn build_args_rejects_malformed_email() {
        let hub = NotifierHub::new_test_only();
        let policy = NotificationPolicy {
            methods: vec![NotificationMethod::Email],
            params: NotificationParams {
                email: Some(EmailParams {
                    sender: "not-an-email".to_string(),
                    recipient: "also-bad".to_string(),
                    subject: "hi".to_string(),
                    body: None,
                }),
                ..Default::default()
            },
        };
        let record = record_with_policy(Some(policy));
        let err = hub.build_args(NotificationMethod::Email, &record, SlurmState::Completed).unwrap_err();
        assert!(matches!(err, NotifyError::InvalidArgs(_)));
    }

    #[test]
    fn build_args_fills_rabbitmq_body_from_terminal_message() {
        let hub = NotifierHub::new_test_only();
        let policy = NotificationPolicy {
            methods: vec![NotificationMethod::Rabbitmq],
            params: NotificationParams {
                rabbitmq: Some(RabbitMqParams {
                    queue: "q".to_string(),
                    exchange: String::new(),
                    routing_key: "rk".to_string(),
                }),
                ..Default::default()
            },
        };
        let record = record_with_policy(Some(policy));
        let args = hub.build_args(NotificationMethod::Rabbitmq, &record, SlurmState::Completed).unwrap();
        match args {
            NotifyArgs::Rabbitmq { queue, body, .. } => {
                assert_eq!(queue, "q");
                assert!(body.contains("echo_hello_world"));
            }
            other => panic!("unexpected args: {other:?}"),
        }
    }
}
