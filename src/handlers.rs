//! Tool Handlers
//!
//! The four operations behind the MCP tools: local execution, history
//! query, remote execution and remote disconnect. Each takes typed
//! arguments and the shared [`ToolContext`].

use crate::config::ShellKind;
use crate::context::ToolContext;
use crate::error::{ExecError, Result};
use crate::metrics::{self, Target};
use crate::tools::{resolve_working_directory, ExecutionResult, HistoryEntry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::{info, warn};

/// Notice returned by `get_command_history` when history is off
pub const HISTORY_DISABLED: &str = "Command history is disabled in configuration";

/// Error text when remote execution is switched off
pub const SSH_DISABLED: &str = "SSH support is disabled in configuration";

/// Arguments for `execute_command`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandArgs {
    pub shell: String,
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Arguments for `get_command_history`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetHistoryArgs {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Arguments for `ssh_execute`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshExecuteArgs {
    pub connection_id: String,
    pub command: String,
}

/// Arguments for `ssh_disconnect`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshDisconnectArgs {
    pub connection_id: String,
}

/// What a tool call returns to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    /// Text shown to the caller
    pub text: String,

    /// True when the command ran but exited non-zero
    pub is_error: bool,

    /// Structured details (exit code, shell, directory, connection)
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl ToolOutput {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            metadata: Value::Null,
        }
    }
}

/// Run a command in a local shell
///
/// # Errors
///
/// [`ExecError::ShellUnavailable`], [`ExecError::PolicyViolation`],
/// [`ExecError::Process`], [`ExecError::Timeout`]. A non-zero exit is an
/// `Ok` output with `is_error` set.
pub async fn run_local(ctx: &ToolContext, args: ExecuteCommandArgs) -> Result<ToolOutput> {
    run_local_inner(ctx, &args).await.inspect_err(|e| {
        warn!(shell = %args.shell, kind = e.kind(), error = %e, "Local command rejected or failed");
        metrics::record_error(Target::Local, e.kind());
    })
}

async fn run_local_inner(ctx: &ToolContext, args: &ExecuteCommandArgs) -> Result<ToolOutput> {
    let kind = ShellKind::from_str(&args.shell)
        .map_err(|_| ExecError::ShellUnavailable(args.shell.clone()))?;
    let shell = ctx.config.shells.get(kind);
    if !shell.enabled {
        return Err(ExecError::ShellUnavailable(kind.to_string()));
    }

    ctx.validator.validate(&args.command, shell)?;
    let working_dir =
        resolve_working_directory(args.working_dir.as_deref(), &ctx.config.security)?;

    info!(shell = %kind, cwd = %working_dir.display(), "Executing command");
    let result = ctx
        .executor
        .execute(shell, &args.command, &working_dir, ctx.timeout())
        .await?;

    let text = result.render();
    ctx.history.append(HistoryEntry::local(
        args.command.clone(),
        text.clone(),
        result.exit_code_or_sentinel(),
    ));
    metrics::record_command(Target::Local, result.exit_code, result.duration_ms / 1000.0);

    Ok(ToolOutput {
        text,
        is_error: !result.success(),
        metadata: json!({
            "exitCode": result.exit_code_or_sentinel(),
            "shell": kind.as_str(),
            "workingDirectory": working_dir.display().to_string(),
        }),
    })
}

/// Return recent history as pretty JSON, or a notice when history is off
pub fn get_history(ctx: &ToolContext, args: GetHistoryArgs) -> Result<ToolOutput> {
    if !ctx.history.is_enabled() {
        return Ok(ToolOutput::text(HISTORY_DISABLED));
    }
    let entries = ctx.history.query(args.limit);
    let text = serde_json::to_string_pretty(&entries)
        .map_err(|e| ExecError::Process(format!("Failed to serialize history: {}", e)))?;
    Ok(ToolOutput::text(text))
}

/// Run a command on a pooled remote session
///
/// Remote commands are checked against the `cmd` shell's operator set and
/// run under the same timeout as local ones. A timed-out session is
/// evicted so the next call reconnects.
///
/// # Errors
///
/// [`ExecError::FeatureDisabled`], [`ExecError::UnknownConnection`] (both
/// before any network I/O), [`ExecError::PolicyViolation`],
/// [`ExecError::Connection`], [`ExecError::Process`], [`ExecError::Timeout`].
pub async fn run_remote(ctx: &ToolContext, args: SshExecuteArgs) -> Result<ToolOutput> {
    run_remote_inner(ctx, &args).await.inspect_err(|e| {
        warn!(connection_id = %args.connection_id, kind = e.kind(), error = %e, "Remote command rejected or failed");
        metrics::record_error(Target::Remote, e.kind());
    })
}

async fn run_remote_inner(ctx: &ToolContext, args: &SshExecuteArgs) -> Result<ToolOutput> {
    if !ctx.config.ssh.enabled {
        return Err(ExecError::FeatureDisabled(SSH_DISABLED.to_string()));
    }
    let connection = ctx
        .config
        .ssh
        .connections
        .get(&args.connection_id)
        .ok_or_else(|| ExecError::UnknownConnection(args.connection_id.clone()))?;

    ctx.validator.validate(&args.command, &ctx.config.shells.cmd)?;

    let session = ctx.pool.get_session(&args.connection_id, connection).await?;
    let timeout = ctx.timeout();
    info!(connection_id = %args.connection_id, "Executing remote command");

    let result: ExecutionResult = match timeout.run(session.run(&args.command)).await {
        Ok(result) => result,
        Err(err) => {
            if matches!(err, ExecError::Timeout { .. }) {
                ctx.pool.evict(&args.connection_id, &session).await;
            }
            return Err(err);
        }
    };

    let text = result.render();
    ctx.history.append(HistoryEntry::remote(
        args.connection_id.clone(),
        args.command.clone(),
        text.clone(),
        result.exit_code_or_sentinel(),
    ));
    metrics::record_command(Target::Remote, result.exit_code, result.duration_ms / 1000.0);

    Ok(ToolOutput {
        text,
        is_error: !result.success(),
        metadata: json!({
            "exitCode": result.exit_code_or_sentinel(),
            "connectionId": args.connection_id,
        }),
    })
}

/// Close the pooled session for a connection id
///
/// Closing an id with no session is not an error.
pub async fn close_remote(ctx: &ToolContext, args: SshDisconnectArgs) -> Result<ToolOutput> {
    if !ctx.config.ssh.enabled {
        return Err(ExecError::FeatureDisabled(SSH_DISABLED.to_string()));
    }
    ctx.pool.close_session(&args.connection_id).await;
    Ok(ToolOutput::text(format!(
        "Disconnected from {}",
        args.connection_id
    )))
}
