use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ToolError, ToolErrorKind, ToolResult};
use crate::workspace::WorkspaceManager;

const READ_CHUNK_BYTES: usize = 8 * 1024;
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl ProcessSpec {
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote_token(&self.program));
        parts.extend(self.args.iter().map(|arg| quote_token(arg)));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub pid: Option<u32>,
    pub duration_ms: u64,
    pub truncated: bool,
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ProcessStatus::Completed
    }

    /// stdout and stderr joined, skipping whichever is blank.
    pub fn aggregated(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else if self.stdout.trim().is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Converts a failed or timed-out outcome into the per-call error.
    pub fn into_error(self, command_line: &str) -> ToolError {
        let detail = json!({
            "command": command_line,
            "exitCode": self.exit_code,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "durationMs": self.duration_ms,
            "truncated": self.truncated,
        });
        match self.status {
            ProcessStatus::TimedOut => ToolError::new(
                ToolErrorKind::TimedOut,
                format!("`{command_line}` exceeded its deadline after {}ms", self.duration_ms),
            )
            .with_detail(detail),
            _ => {
                let code = self
                    .exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_owned());
                let stderr_tail = last_non_empty_line(&self.stderr)
                    .map(|line| format!(": {line}"))
                    .unwrap_or_default();
                ToolError::new(
                    ToolErrorKind::ExternalTool,
                    format!("`{command_line}` exited with {code}{stderr_tail}"),
                )
                .with_detail(detail)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Capture {
    data: Vec<u8>,
    truncated: bool,
}

/// Spawns external programs inside the workspace, one OS process per call,
/// and never returns before that process has exited or been killed.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    workspace: Arc<WorkspaceManager>,
    max_output_bytes: usize,
    drain_grace: Duration,
}

impl ProcessRunner {
    pub fn new(workspace: Arc<WorkspaceManager>, max_output_bytes: usize) -> Self {
        Self {
            workspace,
            max_output_bytes: max_output_bytes.max(1),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    pub async fn run(&self, spec: ProcessSpec) -> ToolResult<ProcessOutcome> {
        if spec.timeout.is_zero() {
            return Err(ToolError::schema("process timeout must be greater than zero"));
        }
        if !self.workspace.contains(&spec.working_dir) {
            return Err(ToolError::new(
                ToolErrorKind::PathEscape,
                format!(
                    "working directory {} is outside workspace root {}",
                    spec.working_dir.display(),
                    self.workspace.root().display()
                ),
            ));
        }
        if !spec.working_dir.is_dir() {
            return Err(ToolError::not_found(format!(
                "working directory not found: {}",
                self.workspace.display(&spec.working_dir)
            )));
        }

        let command_line = spec.command_line();
        let started = Instant::now();
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                ToolError::new(
                    ToolErrorKind::ExternalTool,
                    format!("failed to spawn `{}`: {err}", spec.program),
                )
                .with_detail(json!({ "command": command_line }))
            })?;
        let pid = child.id();
        debug!("spawned `{command_line}` pid={pid:?}");

        let stdout_sink = Arc::new(Mutex::new(Capture::default()));
        let stderr_sink = Arc::new(Mutex::new(Capture::default()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stream) = child.stdout.take() {
            readers.push(spawn_pump(stream, stdout_sink.clone(), self.max_output_bytes));
        }
        if let Some(stream) = child.stderr.take() {
            readers.push(spawn_pump(stream, stderr_sink.clone(), self.max_output_bytes));
        }

        let (status, exit_code) = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(exit)) => {
                let status = if exit.success() {
                    ProcessStatus::Completed
                } else {
                    ProcessStatus::Failed
                };
                (status, exit.code())
            }
            Ok(Err(err)) => {
                let _ = child.kill().await;
                abort_all(readers);
                return Err(ToolError::new(
                    ToolErrorKind::ExternalTool,
                    format!("failed waiting on `{command_line}`: {err}"),
                ));
            }
            Err(_) => {
                warn!(
                    "`{command_line}` exceeded {}ms, killing pid={pid:?}",
                    spec.timeout.as_millis()
                );
                if let Err(err) = child.kill().await {
                    warn!("failed killing pid={pid:?}: {err}");
                }
                (ProcessStatus::TimedOut, None)
            }
        };

        for mut reader in readers {
            if tokio::time::timeout(self.drain_grace, &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
        }

        let (stdout, stdout_truncated) = take_capture(&stdout_sink);
        let (stderr, stderr_truncated) = take_capture(&stderr_sink);
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!("`{command_line}` finished status={status:?} exit={exit_code:?} in {duration_ms}ms");

        Ok(ProcessOutcome {
            status,
            exit_code,
            stdout,
            stderr,
            pid,
            duration_ms,
            truncated: stdout_truncated || stderr_truncated,
        })
    }
}

fn spawn_pump<R>(stream: R, sink: Arc<Mutex<Capture>>, limit: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move { pump(stream, sink, limit).await })
}

// Keeps draining past the limit so a chatty child never blocks on a full pipe.
async fn pump<R>(mut stream: R, sink: Arc<Mutex<Capture>>, limit: usize)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let read = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut capture = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let room = limit.saturating_sub(capture.data.len());
        if read > room {
            capture.truncated = true;
        }
        let keep = read.min(room);
        capture.data.extend_from_slice(&chunk[..keep]);
    }
}

fn take_capture(sink: &Arc<Mutex<Capture>>) -> (String, bool) {
    let mut capture = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let data = std::mem::take(&mut capture.data);
    (String::from_utf8_lossy(&data).to_string(), capture.truncated)
}

fn abort_all(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        reader.abort();
    }
}

fn last_non_empty_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|line| !line.is_empty())
}

fn quote_token(token: &str) -> String {
    if !token.is_empty()
        && token
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '='))
    {
        token.to_owned()
    } else {
        format!("'{}'", token.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::tests::temp_path;

    fn runner(tag: &str, max_output_bytes: usize) -> (ProcessRunner, PathBuf) {
        let workspace = Arc::new(WorkspaceManager::new(&temp_path(tag)).expect("workspace"));
        let root = workspace.root().to_path_buf();
        (ProcessRunner::new(workspace, max_output_bytes), root)
    }

    fn sh(script: &str, cwd: PathBuf, timeout_ms: u64) -> ProcessSpec {
        ProcessSpec {
            program: "sh".to_owned(),
            args: vec!["-c".to_owned(), script.to_owned()],
            working_dir: cwd,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn command_line_quotes_tokens_with_spaces() {
        let spec = ProcessSpec {
            program: "apktool".to_owned(),
            args: vec!["d".to_owned(), "my app.apk".to_owned(), "-o".to_owned(), "out".to_owned()],
            working_dir: PathBuf::from("/tmp"),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(spec.command_line(), "apktool d 'my app.apk' -o out");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_stderr_separately() {
        let (runner, root) = runner("proc-capture", 4096);
        let outcome = runner
            .run(sh("echo out; echo err >&2", root, 5_000))
            .await
            .expect("run");
        assert_eq!(outcome.status, ProcessStatus::Completed);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert!(!outcome.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let (runner, root) = runner("proc-fail", 4096);
        let outcome = runner
            .run(sh("echo broken manifest >&2; exit 3", root, 5_000))
            .await
            .expect("run");
        assert_eq!(outcome.status, ProcessStatus::Failed);
        assert_eq!(outcome.exit_code, Some(3));
        let err = outcome.into_error("apktool d x.apk");
        assert_eq!(err.kind, ToolErrorKind::ExternalTool);
        assert!(err.message.contains("exited with 3: broken manifest"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_process_and_keeps_partial_output() {
        let (runner, root) = runner("proc-timeout", 4096);
        let outcome = runner
            .run(sh("echo started; exec sleep 30", root, 300))
            .await
            .expect("run");
        assert_eq!(outcome.status, ProcessStatus::TimedOut);
        assert_eq!(outcome.stdout, "started\n");
        assert!(outcome.duration_ms < 10_000);
        #[cfg(target_os = "linux")]
        {
            let pid = outcome.pid.expect("pid");
            assert!(
                !std::path::Path::new(&format!("/proc/{pid}")).exists(),
                "timed out process {pid} still present"
            );
        }
        let err = outcome.into_error("sleep");
        assert_eq!(err.kind, ToolErrorKind::TimedOut);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_beyond_limit_is_truncated() {
        let (runner, root) = runner("proc-truncate", 16);
        let outcome = runner
            .run(sh("printf '%0100d' 0", root, 5_000))
            .await
            .expect("run");
        assert_eq!(outcome.status, ProcessStatus::Completed);
        assert_eq!(outcome.stdout.len(), 16);
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn missing_program_is_external_tool_error() {
        let (runner, root) = runner("proc-missing", 4096);
        let err = runner
            .run(ProcessSpec {
                program: "apktool-mcp-definitely-missing-binary".to_owned(),
                args: vec![],
                working_dir: root,
                timeout: Duration::from_secs(1),
            })
            .await
            .expect_err("spawn must fail");
        assert_eq!(err.kind, ToolErrorKind::ExternalTool);
    }

    #[tokio::test]
    async fn working_dir_outside_workspace_is_rejected() {
        let (runner, _root) = runner("proc-escape", 4096);
        let err = runner
            .run(sh("true", std::env::temp_dir(), 1_000))
            .await
            .expect_err("outside cwd");
        assert_eq!(err.kind, ToolErrorKind::PathEscape);
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected_before_spawn() {
        let (runner, root) = runner("proc-zero", 4096);
        let err = runner.run(sh("true", root, 0)).await.expect_err("zero");
        assert_eq!(err.kind, ToolErrorKind::Schema);
    }
}
