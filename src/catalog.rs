//! The data model: [`Task`], [`JobRecord`], SLURM state sets, and the
//! process-wide, read-only [`TaskCatalog`].

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A SLURM job state as reported by the REST API, normalised at the
/// boundary: anything not in this set becomes [`SlurmState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlurmState {
    Completed,
    Completing,
    Failed,
    Pending,
    Preempted,
    Running,
    Suspended,
    Stopped,
    Timeout,
    Cancelled,
    NodeFail,
    BootFail,
    OutOfMemory,
    ResvDelHold,
    RequeueFed,
    RequeueHold,
    Resizing,
    Revoked,
    Signaling,
    SpecialExit,
    StageOut,
    Deadline,
    Unknown,
}

impl SlurmState {
    /// Parse SLURM's wire representation (`"COMPLETED"`, `"RUNNING"`, ...),
    /// normalising anything unrecognised to [`SlurmState::Unknown`].
    pub fn normalise(raw: &str) -> Self {
        match raw {
            "COMPLETED" => SlurmState::Completed,
            "COMPLETING" => SlurmState::Completing,
            "FAILED" => SlurmState::Failed,
            "PENDING" => SlurmState::Pending,
            "PREEMPTED" => SlurmState::Preempted,
            "RUNNING" => SlurmState::Running,
            "SUSPENDED" => SlurmState::Suspended,
            "STOPPED" => SlurmState::Stopped,
            "TIMEOUT" => SlurmState::Timeout,
            "CANCELLED" => SlurmState::Cancelled,
            "NODE_FAIL" => SlurmState::NodeFail,
            "BOOT_FAIL" => SlurmState::BootFail,
            "OUT_OF_MEMORY" => SlurmState::OutOfMemory,
            "RESV_DEL_HOLD" => SlurmState::ResvDelHold,
            "REQUEUE_FED" => SlurmState::RequeueFed,
            "REQUEUE_HOLD" => SlurmState::RequeueHold,
            "RESIZING" => SlurmState::Resizing,
            "REVOKED" => SlurmState::Revoked,
            "SIGNALING" => SlurmState::Signaling,
            "SPECIAL_EXIT" => SlurmState::SpecialExit,
            "STAGE_OUT" => SlurmState::StageOut,
            "DEADLINE" => SlurmState::Deadline,
            _ => SlurmState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlurmState::Completed => "COMPLETED",
            SlurmState::Completing => "COMPLETING",
            SlurmState::Failed => "FAILED",
            SlurmState::Pending => "PENDING",
            SlurmState::Preempted => "PREEMPTED",
            SlurmState::Running => "RUNNING",
            SlurmState::Suspended => "SUSPENDED",
            SlurmState::Stopped => "STOPPED",
            SlurmState::Timeout => "TIMEOUT",
            SlurmState::Cancelled => "CANCELLED",
            SlurmState::NodeFail => "NODE_FAIL",
            SlurmState::BootFail => "BOOT_FAIL",
            SlurmState::OutOfMemory => "OUT_OF_MEMORY",
            SlurmState::ResvDelHold => "RESV_DEL_HOLD",
            SlurmState::RequeueFed => "REQUEUE_FED",
            SlurmState::RequeueHold => "REQUEUE_HOLD",
            SlurmState::Resizing => "RESIZING",
            SlurmState::Revoked => "REVOKED",
            SlurmState::Signaling => "SIGNALING",
            SlurmState::SpecialExit => "SPECIAL_EXIT",
            SlurmState::StageOut => "STAGE_OUT",
            SlurmState::Deadline => "DEADLINE",
            SlurmState::Unknown => "UNKNOWN",
        }
    }

    /// `TerminalStates = {COMPLETED, FAILED, CANCELLED, SUSPENDED,
    /// NODE_FAIL, TIMEOUT, DEADLINE}`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SlurmState::Completed
                | SlurmState::Failed
                | SlurmState::Cancelled
                | SlurmState::Suspended
                | SlurmState::NodeFail
                | SlurmState::Timeout
                | SlurmState::Deadline
        )
    }
}

impl std::fmt::Display for SlurmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for SlurmState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SlurmState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(SlurmState::normalise(&raw))
    }
}

/// `{parent, input, output, error}` — all absolute paths on the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDirs {
    pub parent: String,
    pub input: String,
    pub output: String,
    pub error: String,
}

/// `task.slurm` resource and placement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSlurm {
    pub partition: String,
    pub cpus_per_task: i64,
    pub mem: i64,
    pub time: i64,
    pub nodes: i64,
    pub ntasks_per_node: i64,
    pub output: String,
    pub error: String,
    pub job_name: String,
    #[serde(default)]
    pub environment: Option<Vec<String>>,
}

/// Per-method notification argument bags, keyed the way `TaskCatalog` and
/// `task.notification` overrides express them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationParams {
    #[serde(default)]
    pub email: Option<EmailParams>,
    #[serde(default)]
    pub slack: Option<SlackParams>,
    #[serde(default)]
    pub rabbitmq: Option<RabbitMqParams>,
    #[serde(default)]
    pub test: Option<TestParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailParams {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackParams {
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RabbitMqParams {
    pub queue: String,
    #[serde(default)]
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestParams {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationMethod {
    Email,
    Gmail,
    Slack,
    Rabbitmq,
    Test,
}

/// Notification policy: which methods fire and the per-method params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationPolicy {
    pub methods: Vec<NotificationMethod>,
    pub params: NotificationParams,
}

impl NotificationPolicy {
    /// Overlay a task-level override onto a catalog default: the union of
    /// methods (overrides can only add, never remove), with per-method
    /// params deep-copied from the catalog default and overlaid key-by-key
    /// by anything the override sets.
    pub fn merge(catalog_default: &NotificationPolicy, task_override: Option<&NotificationPolicy>) -> NotificationPolicy {
        let mut methods = catalog_default.methods.clone();
        let mut params = catalog_default.params.clone();

        if let Some(ovr) = task_override {
            for m in &ovr.methods {
                if !methods.contains(m) {
                    methods.push(*m);
                }
            }
            if ovr.params.email.is_some() {
                params.email = ovr.params.email.clone();
            }
            if ovr.params.slack.is_some() {
                params.slack = ovr.params.slack.clone();
            }
            if ovr.params.rabbitmq.is_some() {
                params.rabbitmq = ovr.params.rabbitmq.clone();
            }
            if ovr.params.test.is_some() {
                params.test = ovr.params.test.clone();
            }
        }

        NotificationPolicy { methods, params }
    }
}

/// The task submitted by a client. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uuid: String,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
    pub cwd: String,
    pub dirs: TaskDirs,
    pub slurm: TaskSlurm,
    #[serde(default)]
    pub notification: Option<NotificationPolicy>,
}

/// One row owned by the Registry: a submission tracked end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub slurm_job_id: i64,
    pub slurm_username: String,
    pub slurm_job_state: SlurmState,
    pub task: Task,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in the process-wide `TaskCatalog`.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub cmd: Option<String>,
    pub default_params: Vec<String>,
    pub description: String,
    pub notification: NotificationPolicy,
}

/// `task_name → TaskDefinition`, read-only after init.
pub struct TaskCatalog {
    entries: HashMap<String, TaskDefinition>,
}

impl TaskCatalog {
    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// The catalog seeded from the original implementation's `TASK_METADATA`,
/// used as both the production default and the fixture the scenario tests
/// assume.
pub fn default_catalog() -> &'static TaskCatalog {
    static CATALOG: OnceLock<TaskCatalog> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let mut entries = HashMap::new();

        entries.insert(
            "echo_hello_world".to_string(),
            TaskDefinition {
                cmd: Some("echo".to_string()),
                default_params: vec![],
                description: "Prints a generic hello world! message".to_string(),
                notification: NotificationPolicy {
                    methods: vec![
                        NotificationMethod::Test,
                        NotificationMethod::Email,
                        NotificationMethod::Slack,
                        NotificationMethod::Rabbitmq,
                    ],
                    params: NotificationParams {
                        email: Some(EmailParams {
                            sender: "areynolds@altius.org".to_string(),
                            recipient: "areynolds@altius.org".to_string(),
                            subject: "Hello World".to_string(),
                            body: None,
                        }),
                        slack: Some(SlackParams {
                            channel: "general".to_string(),
                        }),
                        rabbitmq: Some(RabbitMqParams {
                            queue: "hello_world_queue".to_string(),
                            exchange: String::new(),
                            routing_key: "hello_world".to_string(),
                        }),
                        test: Some(TestParams {}),
                    },
                },
            },
        );

        entries.insert(
            "generic_task".to_string(),
            TaskDefinition {
                cmd: None,
                default_params: vec![],
                description: "A generic task that can be used to run any command.".to_string(),
                notification: NotificationPolicy {
                    methods: vec![NotificationMethod::Test],
                    params: NotificationParams {
                        test: Some(TestParams {}),
                        ..Default::default()
                    },
                },
            },
        );

        TaskCatalog { entries }
    })
}
