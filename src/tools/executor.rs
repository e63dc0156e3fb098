//! Shell Executor
//!
//! Spawns one host shell per request, drains both output streams, and
//! enforces the execution timeout. A command that exits non-zero is a normal
//! result; only spawn/runtime failures and timeouts are errors.

use super::timeout::ExecutionTimeout;
use crate::config::ShellConfig;
use crate::error::{ExecError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

/// Maximum retained size of each output stream in bytes (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Result of one command execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Standard output (truncated if too large)
    pub stdout: String,

    /// Standard error (truncated if too large)
    pub stderr: String,

    /// Exit code (None if the process was terminated by a signal)
    pub exit_code: Option<i32>,

    /// Execution duration in milliseconds
    pub duration_ms: f64,
}

impl ExecutionResult {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code with the missing-code sentinel folded to -1
    pub fn exit_code_or_sentinel(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }

    /// Caller-facing text for this result
    ///
    /// Exit 0 yields stdout, or a fixed notice when stdout is empty. Anything
    /// else yields the exit code followed by both streams.
    pub fn render(&self) -> String {
        if self.success() {
            if self.stdout.is_empty() {
                "Command completed successfully (no output)".to_string()
            } else {
                self.stdout.clone()
            }
        } else {
            let mut text = format!(
                "Command failed with exit code {}\n",
                self.exit_code_or_sentinel()
            );
            if !self.stderr.is_empty() {
                text.push_str(&format!("Error output:\n{}\n", self.stderr));
            }
            if !self.stdout.is_empty() {
                text.push_str(&format!("Standard output:\n{}", self.stdout));
            }
            text
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "exit code: {:?}, {:.0}ms, {} bytes output",
            self.exit_code,
            self.duration_ms,
            self.stdout.len() + self.stderr.len()
        )
    }
}

/// The signal that settles an execution
///
/// Exactly one is produced per spawned child; whichever arrives first wins
/// and the rest are dropped with their futures.
enum Settlement {
    /// Both streams hit end-of-stream and the process exited
    Completed {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        status: ExitStatus,
    },
    /// Reading a stream or waiting on the child failed
    Failed(std::io::Error),
    /// The timeout elapsed first
    TimedOut,
}

/// Local shell executor
///
/// # Example
///
/// ```no_run
/// use shellward::config::Config;
/// use shellward::tools::{ExecutionTimeout, ShellExecutor};
///
/// #[tokio::main]
/// async fn main() -> shellward::error::Result<()> {
///     let config = Config::default();
///     let executor = ShellExecutor::new();
///     let cwd = std::env::current_dir()?;
///
///     let result = executor
///         .execute(&config.shells.sh, "echo hello", &cwd, ExecutionTimeout::from_secs(5))
///         .await?;
///     assert_eq!(result.stdout, "hello\n");
///     Ok(())
/// }
/// ```
#[derive(Debug, Default)]
pub struct ShellExecutor {
    /// Spawn attempts made by this executor
    spawned: AtomicU64,
}

impl ShellExecutor {
    /// Create a new executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spawn attempts so far
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Run `command` through `shell` in `working_dir`
    ///
    /// The shell is invoked as `shell.command shell.args... command`; the
    /// command text is never parsed here.
    ///
    /// # Errors
    ///
    /// - [`ExecError::Process`] if the shell cannot be spawned, or a stream
    ///   read or wait fails before completion
    /// - [`ExecError::Timeout`] if the timeout elapses first; the child is
    ///   killed and any partial output is discarded
    pub async fn execute(
        &self,
        shell: &ShellConfig,
        command: &str,
        working_dir: &Path,
        timeout: ExecutionTimeout,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        debug!(shell = %shell.command, cwd = %working_dir.display(), "Spawning shell");

        self.spawned.fetch_add(1, Ordering::SeqCst);
        let mut child = TokioCommand::new(&shell.command)
            .args(&shell.args)
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!(shell = %shell.command, error = %e, "Failed to spawn shell");
                ExecError::Process(format!("Failed to start {}: {}", shell.command, e))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let settlement = tokio::select! {
            done = async {
                tokio::join!(drain(stdout), drain(stderr), child.wait())
            } => match done {
                (Ok(stdout), Ok(stderr), Ok(status)) => Settlement::Completed { stdout, stderr, status },
                (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Settlement::Failed(e),
            },
            _ = tokio::time::sleep(timeout.duration()) => Settlement::TimedOut,
        };

        match settlement {
            Settlement::Completed {
                stdout,
                stderr,
                status,
            } => {
                let result = ExecutionResult {
                    stdout: truncate_string(
                        String::from_utf8_lossy(&stdout).into_owned(),
                        MAX_OUTPUT_SIZE,
                    ),
                    stderr: truncate_string(
                        String::from_utf8_lossy(&stderr).into_owned(),
                        MAX_OUTPUT_SIZE,
                    ),
                    exit_code: status.code(),
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                };
                info!(exit_code = ?result.exit_code, "Command finished ({})", result.summary());
                Ok(result)
            }
            Settlement::Failed(e) => {
                warn!(error = %e, "Command failed before completion");
                let _ = child.start_kill();
                Err(ExecError::Process(e.to_string()))
            }
            Settlement::TimedOut => {
                warn!(seconds = timeout.seconds(), "Command timed out, killing child");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out child");
                }
                Err(timeout.error())
            }
        }
    }
}

async fn drain<R>(stream: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Truncate a string to a maximum length, adding ellipsis if truncated
pub(crate) fn truncate_string(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len.saturating_sub(3);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(stdout: &str, stderr: &str, exit_code: Option<i32>) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            duration_ms: 1.0,
        }
    }

    #[test]
    fn test_render_success() {
        assert_eq!(result("hi\n", "", Some(0)).render(), "hi\n");
        assert_eq!(
            result("", "", Some(0)).render(),
            "Command completed successfully (no output)"
        );
    }

    #[test]
    fn test_render_failure() {
        let text = result("partial", "boom", Some(2)).render();
        assert!(text.starts_with("Command failed with exit code 2\n"));
        assert!(text.contains("Error output:\nboom\n"));
        assert!(text.contains("Standard output:\npartial"));
    }

    #[test]
    fn test_render_missing_exit_code() {
        let res = result("", "", None);
        assert!(!res.success());
        assert_eq!(res.exit_code_or_sentinel(), -1);
        assert!(res.render().contains("exit code -1"));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short".to_string(), 10), "short");
        assert_eq!(truncate_string("0123456789abc".to_string(), 10), "0123456...");
        // Never splits a multi-byte char
        let s = truncate_string("ééééé".to_string(), 6);
        assert!(s.ends_with("..."));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::config::Config;
        use std::path::PathBuf;
        use sysinfo::{Pid, System};

        fn sh() -> ShellConfig {
            Config::default().shells.sh
        }

        fn cwd() -> PathBuf {
            std::env::current_dir().unwrap()
        }

        #[tokio::test]
        async fn test_execute_echo() {
            let executor = ShellExecutor::new();
            let res = executor
                .execute(&sh(), "echo hello", &cwd(), ExecutionTimeout::from_secs(5))
                .await
                .unwrap();
            assert_eq!(res.stdout, "hello\n");
            assert_eq!(res.stderr, "");
            assert_eq!(res.exit_code, Some(0));
            assert!(res.success());
            assert_eq!(executor.spawn_count(), 1);
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_a_result() {
            let executor = ShellExecutor::new();
            let res = executor
                .execute(
                    &sh(),
                    "echo out; echo err >&2; exit 3",
                    &cwd(),
                    ExecutionTimeout::from_secs(5),
                )
                .await
                .unwrap();
            assert_eq!(res.exit_code, Some(3));
            assert_eq!(res.stdout, "out\n");
            assert_eq!(res.stderr, "err\n");
        }

        #[tokio::test]
        async fn test_killed_by_signal_has_no_exit_code() {
            let executor = ShellExecutor::new();
            let res = executor
                .execute(&sh(), "kill -9 $$", &cwd(), ExecutionTimeout::from_secs(5))
                .await
                .unwrap();
            assert_eq!(res.exit_code, None);
        }

        #[tokio::test]
        async fn test_working_directory_applied() {
            let dir = tempfile::TempDir::new().unwrap();
            let executor = ShellExecutor::new();
            let res = executor
                .execute(&sh(), "pwd", dir.path(), ExecutionTimeout::from_secs(5))
                .await
                .unwrap();
            let reported = PathBuf::from(res.stdout.trim());
            assert_eq!(
                reported.canonicalize().unwrap(),
                dir.path().canonicalize().unwrap()
            );
        }

        #[tokio::test]
        async fn test_spawn_failure_is_process_error() {
            let mut shell = sh();
            shell.command = "/nonexistent/shell-binary".to_string();
            let executor = ShellExecutor::new();
            let err = executor
                .execute(&shell, "echo hi", &cwd(), ExecutionTimeout::from_secs(5))
                .await
                .unwrap_err();
            assert!(matches!(err, ExecError::Process(_)));
            assert_eq!(executor.spawn_count(), 1);
        }

        #[tokio::test]
        async fn test_missing_working_directory_is_process_error() {
            let executor = ShellExecutor::new();
            let err = executor
                .execute(
                    &sh(),
                    "echo hi",
                    Path::new("/nonexistent/dir/for/shellward"),
                    ExecutionTimeout::from_secs(5),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ExecError::Process(_)));
        }

        #[tokio::test]
        async fn test_timeout_kills_child() {
            let dir = tempfile::TempDir::new().unwrap();
            let pid_file = dir.path().join("pid");
            let command = format!("echo $$ > {}; sleep 10", pid_file.display());

            let executor = ShellExecutor::new();
            let start = Instant::now();
            let err = executor
                .execute(&sh(), &command, dir.path(), ExecutionTimeout::from_secs(1))
                .await
                .unwrap_err();
            let elapsed = start.elapsed();

            assert_eq!(err, ExecError::Timeout { seconds: 1 });
            assert!(err.to_string().contains("timed out after 1 seconds"));
            assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);

            let pid: u32 = std::fs::read_to_string(&pid_file)
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            let system = System::new_all();
            assert!(system.process(Pid::from_u32(pid)).is_none());
        }

        #[tokio::test]
        async fn test_large_output_on_both_streams() {
            let executor = ShellExecutor::new();
            let command = "i=0; while [ $i -lt 10000 ]; do echo xxxxxxxxxx; echo yyyyyyyyyy >&2; i=$((i+1)); done";
            let res = executor
                .execute(&sh(), command, &cwd(), ExecutionTimeout::from_secs(30))
                .await
                .unwrap();
            assert_eq!(res.exit_code, Some(0));
            assert_eq!(res.stdout.len(), 110_000);
            assert_eq!(res.stderr.len(), 110_000);
        }

        #[tokio::test]
        async fn test_concurrent_executions_are_independent() {
            let executor = ShellExecutor::new();
            let runs = (0..8).map(|i| {
                let executor = &executor;
                async move {
                    let cmd = format!("echo {}", i);
                    executor
                        .execute(&sh(), &cmd, &cwd(), ExecutionTimeout::from_secs(10))
                        .await
                        .map(|r| r.stdout)
                }
            });
            let outputs = futures::future::join_all(runs).await;
            for (i, out) in outputs.into_iter().enumerate() {
                assert_eq!(out.unwrap(), format!("{}\n", i));
            }
            assert_eq!(executor.spawn_count(), 8);
        }
    }
}
