// Prometheus metrics for shellward
//
// Exposes metrics on the /metrics HTTP endpoint:
// - Executed commands by target and outcome (counter)
// - Policy violations and timeouts (counter)
// - Command duration (histogram)
// - Active remote sessions (gauge)
// - MCP tool calls (counter)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Execution metrics
    pub static ref COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("shellward_commands_total", "Total number of commands executed"),
        &["target", "outcome"]
    ).expect("Failed to create commands total metric");

    pub static ref POLICY_VIOLATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("shellward_policy_violations_total", "Total number of requests rejected by policy"),
        &["target"]
    ).expect("Failed to create policy violations metric");

    pub static ref COMMAND_TIMEOUTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("shellward_command_timeouts_total", "Total number of commands that timed out"),
        &["target"]
    ).expect("Failed to create command timeouts metric");

    pub static ref COMMAND_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("shellward_command_duration_seconds", "Command execution duration in seconds"),
        &["target"]
    ).expect("Failed to create command duration metric");

    // Session metrics
    pub static ref ACTIVE_SESSIONS: IntGauge = IntGauge::new(
        "shellward_active_sessions",
        "Number of currently held remote sessions"
    ).expect("Failed to create active sessions metric");

    // MCP metrics
    pub static ref MCP_TOOL_CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("shellward_mcp_tool_calls_total", "Total number of MCP tool calls"),
        &["tool_name", "status"]
    ).expect("Failed to create MCP tool calls metric");
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Register all metrics with [`REGISTRY`]
///
/// Safe to call more than once; only the first call registers.
pub fn init() -> prometheus::Result<()> {
    if INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }
    REGISTRY.register(Box::new(COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POLICY_VIOLATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMAND_TIMEOUTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMAND_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_SESSIONS.clone()))?;
    REGISTRY.register(Box::new(MCP_TOOL_CALLS_TOTAL.clone()))?;
    Ok(())
}

/// Where a command ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Local,
    Remote,
}

impl Target {
    fn label(self) -> &'static str {
        match self {
            Target::Local => "local",
            Target::Remote => "remote",
        }
    }
}

/// Record a command that ran to completion
pub fn record_command(target: Target, exit_code: Option<i32>, duration_secs: f64) {
    let outcome = if exit_code == Some(0) {
        "success"
    } else {
        "failure"
    };
    COMMANDS_TOTAL
        .with_label_values(&[target.label(), outcome])
        .inc();
    COMMAND_DURATION_SECONDS
        .with_label_values(&[target.label()])
        .observe(duration_secs);
}

/// Record a command that failed with an error kind
pub fn record_error(target: Target, kind: &str) {
    match kind {
        "policy_violation" => POLICY_VIOLATIONS_TOTAL
            .with_label_values(&[target.label()])
            .inc(),
        "timeout" => COMMAND_TIMEOUTS_TOTAL
            .with_label_values(&[target.label()])
            .inc(),
        _ => {}
    }
    COMMANDS_TOTAL
        .with_label_values(&[target.label(), "error"])
        .inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
