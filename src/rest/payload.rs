//! Construction of the Phase A (preliminary) and Phase B (main) SLURM REST
//! submit payloads.

use serde::{Deserialize, Serialize};
use tinytemplate::TinyTemplate;

use crate::catalog::{Task, TaskCatalog};
use crate::error::ProxyError;

static PRELIMINARY_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/preliminary.sh.tpl"));
static MAIN_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/main.sh.tpl"));

#[derive(Debug, Serialize, Deserialize)]
pub struct SetNumber {
    pub set: bool,
    pub number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobDescription {
    pub name: String,
    pub partition: String,
    pub cpus_per_task: i64,
    pub memory_per_cpu: SetNumber,
    pub time_limit: SetNumber,
    pub current_working_directory: String,
    pub standard_output: String,
    pub standard_error: String,
    pub environment: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dependency: Option<String>,
}

/// The body POSTed to `slurm/vX/job/submit/`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobPayload {
    pub script: String,
    pub job: JobDescription,
}

#[derive(serde::Serialize)]
struct MkdirContext {
    mkdir_cmd: String,
}

#[derive(serde::Serialize)]
struct TaskCmdContext {
    task_cmd: String,
}

/// `define_task_cmd(name, cmd?, params)`: base command (task-level `cmd`
/// override, else catalog default) followed by the catalog's
/// `default_params` then the task's own `params`, single-space joined.
/// Fails if neither the task nor the catalog names a command.
pub fn define_task_cmd(catalog: &TaskCatalog, task: &Task) -> Result<String, ProxyError> {
    let def = catalog
        .get(&task.name)
        .ok_or_else(|| ProxyError::Validation(format!("unknown task name: {}", task.name)))?;

    let base = task
        .cmd
        .clone()
        .or_else(|| def.cmd.clone())
        .ok_or_else(|| ProxyError::Validation(format!("no command defined for task {}", task.name)))?;

    let mut parts = vec![base];
    parts.extend(def.default_params.iter().cloned());
    parts.extend(task.params.iter().cloned());
    Ok(parts.join(" "))
}

fn render(template: &'static str, name: &str, context: &impl Serialize) -> Result<String, ProxyError> {
    let mut tt = TinyTemplate::new();
    // html escape breaks shell quoting
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template(name, template)
        .map_err(|e| ProxyError::Validation(format!("template error: {e}")))?;
    tt.render(name, context)
        .map_err(|e| ProxyError::Validation(format!("template render error: {e}")))
}

/// Phase A: `mkdir -p` for all four directories, fixed minimum resources,
/// output/error sent to `/dev/null`.
pub fn preliminary_payload(task: &Task) -> Result<SubmitJobPayload, ProxyError> {
    let dirs = &task.dirs;
    let mkdir_cmd = format!(
        "mkdir -p {} ; mkdir -p {} ; mkdir -p {} ; mkdir -p {}",
        dirs.parent, dirs.input, dirs.output, dirs.error
    );
    let script = render(PRELIMINARY_TEMPLATE, "preliminary", &MkdirContext { mkdir_cmd })?;

    Ok(SubmitJobPayload {
        script,
        job: JobDescription {
            name: format!("hpc-proxy-preliminary-{}-{}-preliminary", task.name, task.uuid),
            partition: task.slurm.partition.clone(),
            cpus_per_task: 1,
            memory_per_cpu: SetNumber { set: true, number: 100 },
            time_limit: SetNumber { set: true, number: 100 },
            current_working_directory: task.cwd.clone(),
            standard_output: "/dev/null".to_string(),
            standard_error: "/dev/null".to_string(),
            environment: vec!["PATH=/bin/:/usr/bin/:/sbin/".to_string()],
            dependency: None,
        },
    })
}

/// Phase B: the task command, chained with `afterok:<preliminary_job_id>`.
pub fn main_payload(
    catalog: &TaskCatalog,
    task: &Task,
    preliminary_job_id: i64,
) -> Result<SubmitJobPayload, ProxyError> {
    let task_cmd = define_task_cmd(catalog, task)?;
    let script = render(MAIN_TEMPLATE, "main", &TaskCmdContext { task_cmd })?;

    let environment = task
        .slurm
        .environment
        .clone()
        .unwrap_or_else(|| vec!["PATH=/bin/:/usr/bin/:/sbin/".to_string()]);

    Ok(SubmitJobPayload {
        script,
        job: JobDescription {
            name: format!("hpc-proxy-{}-{}-main", task.name, task.uuid),
            partition: task.slurm.partition.clone(),
            cpus_per_task: task.slurm.cpus_per_task,
            memory_per_cpu: SetNumber { set: true, number: task.slurm.mem },
            time_limit: SetNumber { set: true, number: task.slurm.time },
            current_working_directory: task.cwd.clone(),
            standard_output: format!("{}/{}", task.dirs.output, task.slurm.output),
            standard_error: format!("{}/{}", task.dirs.error, task.slurm.error),
            environment,
            dependency: Some(format!("afterok:{preliminary_job_id}")),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{default_catalog, TaskDirs, TaskSlurm};

    fn sample_task() -> Task {
        Task {
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
            notification: None,
        }
    }

    #[test]
    fn preliminary_job_name_and_resources() {
        let task = sample_task();
        let payload = preliminary_payload(&task).unwrap();
        assert_eq!(payload.job.name, "hpc-proxy-preliminary-echo_hello_world-u1-preliminary");
        assert_eq!(payload.job.cpus_per_task, 1);
        assert_eq!(payload.job.memory_per_cpu.number, 100);
        assert_eq!(payload.job.time_limit.number, 100);
        assert_eq!(payload.job.standard_output, "/dev/null");
        assert!(payload.script.contains("mkdir -p /h/a/p"));
        assert!(payload.script.contains("mkdir -p /h/a/i"));
    }

    #[test]
    fn main_job_dependency_is_afterok() {
        let task = sample_task();
        let payload = main_payload(default_catalog(), &task, 1001).unwrap();
        assert_eq!(payload.job.dependency.as_deref(), Some("afterok:1001"));
        assert_eq!(payload.job.name, "hpc-proxy-echo_hello_world-u1-main");
        assert_eq!(payload.job.standard_output, "/h/a/o/o.txt");
        assert!(payload.script.contains("echo"));
    }

    #[test]
    fn define_task_cmd_uses_override_then_catalog_default() {
        let catalog = default_catalog();
        let mut task = sample_task();
        task.params = vec!["hello".to_string()];
        let cmd = define_task_cmd(catalog, &task).unwrap();
        assert_eq!(cmd, "echo hello");

        task.cmd = Some("printf".to_string());
        let cmd = define_task_cmd(catalog, &task).unwrap();
        assert_eq!(cmd, "printf hello");
    }

    #[test]
    fn define_task_cmd_fails_without_any_command() {
        let catalog = default_catalog();
        let mut task = sample_task();
        task.name = "generic_task".to_string();
        task.cmd = None;
        assert!(define_task_cmd(catalog, &task).is_err());
    }
}
