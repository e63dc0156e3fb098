//! Remote Sessions
//!
//! [`RemoteSession`] and [`SessionConnector`] are the seam between the pool
//! and the transport. The production transport is libssh2 via the `ssh2`
//! crate, whose blocking calls run on tokio's blocking pool.

use crate::config::{SshConfig, SshConnectionConfig, SshCredential};
use crate::error::{ExecError, Result};
use crate::tools::{truncate_string, ExecutionResult, MAX_OUTPUT_SIZE};
use async_trait::async_trait;
use ssh2::{Channel, Session};
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A live, authenticated remote execution channel
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run one command and capture its output and exit status
    ///
    /// Calls on the same session are serialized. A closed session fails
    /// with [`ExecError::Process`].
    async fn run(&self, command: &str) -> Result<ExecutionResult>;

    /// Tear down the transport, waiting for an in-flight `run` to finish
    ///
    /// Idempotent.
    async fn close(&self);

    /// Whether the session is still usable
    fn is_alive(&self) -> bool;
}

/// Establishes authenticated sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        connection_id: &str,
        config: &SshConnectionConfig,
    ) -> Result<Arc<dyn RemoteSession>>;
}

/// Connector backed by libssh2
#[derive(Debug, Clone)]
pub struct Ssh2Connector {
    ready_timeout: Duration,
    keepalive_interval: u32,
    command_timeout: Duration,
}

impl Ssh2Connector {
    /// Build a connector from the `[ssh]` section and the command timeout
    pub fn new(ssh: &SshConfig, command_timeout: Duration) -> Self {
        Self {
            ready_timeout: Duration::from_secs(ssh.ready_timeout),
            keepalive_interval: ssh.keepalive_interval.clamp(1, u32::MAX as u64) as u32,
            command_timeout,
        }
    }
}

#[async_trait]
impl SessionConnector for Ssh2Connector {
    async fn connect(
        &self,
        connection_id: &str,
        config: &SshConnectionConfig,
    ) -> Result<Arc<dyn RemoteSession>> {
        let connector = self.clone();
        let config = config.clone();
        let id = connection_id.to_string();

        info!(connection_id = %id, host = %config.host, port = config.port, "Opening SSH session");
        let session = tokio::task::spawn_blocking(move || connector.connect_blocking(&config))
            .await
            .map_err(|e| ExecError::Connection(format!("SSH connect task failed: {}", e)))??;

        Ok(Arc::new(Ssh2Session::new(id, session)))
    }
}

impl Ssh2Connector {
    fn connect_blocking(&self, config: &SshConnectionConfig) -> Result<Session> {
        let credential = config.credential().ok_or_else(|| {
            ExecError::Connection("No usable credential configured".to_string())
        })?;

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| ExecError::Connection(format!("Cannot resolve {}: {}", config.host, e)))?
            .next()
            .ok_or_else(|| {
                ExecError::Connection(format!("No address found for {}", config.host))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, self.ready_timeout)
            .map_err(|e| ExecError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(duration_millis(self.ready_timeout));
        session.handshake()?;

        match &credential {
            SshCredential::Password(password) => {
                session.userauth_password(&config.username, password)?;
            }
            SshCredential::PrivateKey { path, passphrase } => {
                session.userauth_pubkey_file(&config.username, None, path, passphrase.as_deref())?;
            }
        }

        if !session.authenticated() {
            return Err(ExecError::Connection("SSH authentication failed".to_string()));
        }

        session.set_keepalive(true, self.keepalive_interval);
        // Blocking calls give up after the command timeout so a stuck
        // remote command releases its worker thread.
        session.set_timeout(duration_millis(self.command_timeout));
        Ok(session)
    }
}

fn duration_millis(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

/// One libssh2 session
///
/// The mutex doubles as the command lock: `run` holds it for the whole
/// command, and `close` takes it before disconnecting.
pub struct Ssh2Session {
    connection_id: String,
    inner: Mutex<Option<Session>>,
    alive: AtomicBool,
}

impl Ssh2Session {
    fn new(connection_id: String, session: Session) -> Self {
        Self {
            connection_id,
            inner: Mutex::new(Some(session)),
            alive: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RemoteSession for Ssh2Session {
    async fn run(&self, command: &str) -> Result<ExecutionResult> {
        let guard = self.inner.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| ExecError::Process("session closed".to_string()))?
            .clone();
        let command = command.to_string();

        debug!(connection_id = %self.connection_id, "Running remote command");
        let outcome = tokio::task::spawn_blocking(move || exec_blocking(&session, &command))
            .await
            .map_err(|e| ExecError::Process(format!("SSH exec task failed: {}", e)))?;

        if let Err(ExecError::Connection(ref e)) = outcome {
            warn!(connection_id = %self.connection_id, error = %e, "SSH transport failed");
            self.alive.store(false, Ordering::SeqCst);
        }
        drop(guard);
        outcome
    }

    async fn close(&self) {
        let mut guard = self.inner.lock().await;
        self.alive.store(false, Ordering::SeqCst);
        if let Some(session) = guard.take() {
            let id = self.connection_id.clone();
            let result = tokio::task::spawn_blocking(move || {
                session.disconnect(None, "closing", None)
            })
            .await;
            match result {
                Ok(Ok(())) => info!(connection_id = %id, "SSH session closed"),
                Ok(Err(e)) => debug!(connection_id = %id, error = %e, "SSH disconnect failed"),
                Err(e) => debug!(connection_id = %id, error = %e, "SSH disconnect task failed"),
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

// Opening the channel is a transport concern; anything after that belongs
// to the command.
fn exec_blocking(session: &Session, command: &str) -> Result<ExecutionResult> {
    let start = Instant::now();
    let mut channel = session.channel_session()?;
    channel
        .exec(command)
        .map_err(|e| ExecError::Process(format!("Failed to start remote command: {}", e)))?;

    // stdout and stderr share one channel window, so neither may wait on
    // the other.
    session.set_blocking(false);
    let drained = drain_channel(session, &mut channel);
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    channel
        .wait_close()
        .map_err(|e| ExecError::Process(format!("Remote channel did not close: {}", e)))?;

    let signalled = channel
        .exit_signal()
        .map(|s| s.exit_signal.is_some())
        .unwrap_or(false);
    let exit_code = if signalled {
        None
    } else {
        channel
            .exit_status()
            .map_err(|e| ExecError::Process(format!("No remote exit status: {}", e)))
            .map(Some)?
    };

    Ok(ExecutionResult {
        stdout: stdout.into_text(),
        stderr: stderr.into_text(),
        exit_code,
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Read both streams of a non-blocking channel until the remote sends EOF
///
/// Gives up with [`ExecError::Timeout`] once the session's blocking timeout
/// has passed without the command finishing.
fn drain_channel(session: &Session, channel: &mut Channel) -> Result<(Capture, Capture)> {
    let timeout_ms = session.timeout();
    let deadline =
        (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));

    let mut stdout = Capture::default();
    let mut stderr = Capture::default();
    let mut buf = [0u8; 8192];
    loop {
        let mut progressed = read_chunk(&mut *channel, &mut buf, &mut stdout)
            .map_err(|e| ExecError::Process(format!("Failed to read remote output: {}", e)))?;
        progressed |= read_chunk(&mut channel.stderr(), &mut buf, &mut stderr).map_err(|e| {
            ExecError::Process(format!("Failed to read remote error output: {}", e))
        })?;

        if progressed {
            continue;
        }
        if channel.eof() {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ExecError::Timeout {
                seconds: u64::from(timeout_ms).div_ceil(1000),
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if stdout.dropped + stderr.dropped > 0 {
        debug!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "Remote output exceeded capture limit"
        );
    }
    Ok((stdout, stderr))
}

/// One non-blocking read; `Ok(true)` when bytes arrived
fn read_chunk<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    capture: &mut Capture,
) -> io::Result<bool> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            capture.push(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

// A few bytes past the cap so truncation still marks the cut.
const CAPTURE_LIMIT: usize = MAX_OUTPUT_SIZE + 4;

/// One output stream, kept up to the capture limit
///
/// Bytes past the limit are still read, so the remote side never stalls on
/// a full window, but they are discarded.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    dropped: usize,
}

impl Capture {
    fn push(&mut self, chunk: &[u8]) {
        let room = CAPTURE_LIMIT.saturating_sub(self.bytes.len());
        let keep = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }

    fn into_text(self) -> String {
        truncate_string(
            String::from_utf8_lossy(&self.bytes).into_owned(),
            MAX_OUTPUT_SIZE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(host: &str, port: u16) -> SshConnectionConfig {
        SshConnectionConfig {
            host: host.to_string(),
            port,
            username: "pi".to_string(),
            password: Some("raspberry".to_string()),
            private_key_path: None,
            passphrase: None,
        }
    }

    fn connector() -> Ssh2Connector {
        let ssh = SshConfig {
            ready_timeout: 2,
            ..SshConfig::default()
        };
        Ssh2Connector::new(&ssh, Duration::from_secs(5))
    }

    /// Hands out scripted chunks, with `None` standing for "would block"
    struct Scripted(std::collections::VecDeque<Option<&'static [u8]>>);

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(io::ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_read_chunk_treats_would_block_as_idle() {
        let mut reader = Scripted(vec![Some(&b"abc"[..]), None, Some(&b"de"[..])].into());
        let mut capture = Capture::default();
        let mut buf = [0u8; 16];

        assert!(read_chunk(&mut reader, &mut buf, &mut capture).unwrap());
        assert!(!read_chunk(&mut reader, &mut buf, &mut capture).unwrap());
        assert!(read_chunk(&mut reader, &mut buf, &mut capture).unwrap());
        assert!(!read_chunk(&mut reader, &mut buf, &mut capture).unwrap());
        assert_eq!(capture.into_text(), "abcde");
    }

    #[test]
    fn test_read_chunk_propagates_real_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::ConnectionReset.into())
            }
        }
        let mut capture = Capture::default();
        let err = read_chunk(&mut Broken, &mut [0u8; 8], &mut capture).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_remote_output_capped() {
        let mut capture = Capture::default();
        let chunk = vec![b'x'; 64 * 1024];
        for _ in 0..40 {
            capture.push(&chunk);
        }

        assert_eq!(capture.bytes.len(), CAPTURE_LIMIT);
        assert_eq!(capture.dropped, 40 * chunk.len() - CAPTURE_LIMIT);
        let text = capture.into_text();
        assert!(text.len() <= MAX_OUTPUT_SIZE);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn test_small_remote_output_kept_verbatim() {
        let mut capture = Capture::default();
        capture.push(b"line one\n");
        capture.push(b"line two\n");
        assert_eq!(capture.dropped, 0);
        assert_eq!(capture.into_text(), "line one\nline two\n");
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_secs(2)), 2000);
        assert_eq!(duration_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = connector()
            .connect("local", &connection("127.0.0.1", port))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExecError::Connection(_)));
    }

    #[tokio::test]
    async fn test_connect_without_credential_is_connection_error() {
        let mut conn = connection("127.0.0.1", 22);
        conn.password = None;
        let err = connector().connect("local", &conn).await.err().unwrap();
        assert!(matches!(err, ExecError::Connection(_)));
    }

    #[tokio::test]
    async fn test_handshake_failure_is_connection_error() {
        // A peer that accepts and immediately hangs up fails the handshake
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                drop(stream);
            }
        });
        let err = connector()
            .connect("local", &connection("127.0.0.1", port))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExecError::Connection(_)));
        server.join().unwrap();
    }
}
