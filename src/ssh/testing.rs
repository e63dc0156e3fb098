//! In-memory session transport for tests
//!
//! [`FakeConnector`] counts handshakes and hands out [`FakeSession`]s that
//! answer commands without any network:
//!
//! - `exit N` exits with code N and writes to stderr
//! - `sleep N` sleeps N seconds, then succeeds
//! - anything else echoes `ran: <command>` with exit code 0

use super::session::{RemoteSession, SessionConnector};
use crate::config::SshConnectionConfig;
use crate::error::{ExecError, Result};
use crate::tools::ExecutionResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Connector that never touches the network
#[derive(Default)]
pub struct FakeConnector {
    connect_delay: Duration,
    run_delay: Duration,
    handshakes: AtomicUsize,
    failures_left: AtomicUsize,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each handshake takes `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            connect_delay: delay,
            ..Self::default()
        }
    }

    /// Each command on a handed-out session takes `delay`
    pub fn with_run_delay(delay: Duration) -> Self {
        Self {
            run_delay: delay,
            ..Self::default()
        }
    }

    /// Fail the next `n` handshakes with a connection error
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Handshakes attempted so far
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// The `index`th session handed out
    ///
    /// # Panics
    ///
    /// Panics if fewer sessions were created.
    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&sessions[index])
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        connection_id: &str,
        config: &SshConnectionConfig,
    ) -> Result<Arc<dyn RemoteSession>> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExecError::Connection(format!(
                "Authentication failed for {}@{}",
                config.username, config.host
            )));
        }

        let session = Arc::new(FakeSession::new(connection_id, self.run_delay));
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&session));
        Ok(session)
    }
}

/// Scripted remote session
pub struct FakeSession {
    connection_id: String,
    run_delay: Duration,
    open: tokio::sync::Mutex<bool>,
    alive: AtomicBool,
    close_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl FakeSession {
    fn new(connection_id: &str, run_delay: Duration) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            run_delay,
            open: tokio::sync::Mutex::new(true),
            alive: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Simulate a dropped transport
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Highest number of commands observed running at once
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Commands received, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn respond(command: &str) -> (String, String, i32) {
        match command.strip_prefix("exit ").map(|n| n.trim().parse::<i32>()) {
            Some(Ok(code)) => (String::new(), format!("exited with {}\n", code), code),
            _ => (format!("ran: {}\n", command), String::new(), 0),
        }
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&self, command: &str) -> Result<ExecutionResult> {
        let open = self.open.lock().await;
        if !*open {
            return Err(ExecError::Process("session closed".to_string()));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.to_string());

        let mut delay = self.run_delay;
        if let Some(Ok(secs)) = command.strip_prefix("sleep ").map(|s| s.trim().parse::<u64>()) {
            delay += Duration::from_secs(secs);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let (stdout, stderr, code) = Self::respond(command);
        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code: Some(code),
            duration_ms: delay.as_secs_f64() * 1000.0,
        })
    }

    async fn close(&self) {
        let mut open = self.open.lock().await;
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        *open = false;
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
