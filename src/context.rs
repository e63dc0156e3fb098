//! Orchestration Context
//!
//! One per process: the immutable configuration plus the shared ledger,
//! session pool and executor. Every tool call borrows it.

use crate::config::Config;
use crate::ssh::{SessionConnector, SessionPool, Ssh2Connector};
use crate::tools::{CommandHistory, CommandValidator, ExecutionTimeout, ShellExecutor};
use std::sync::Arc;

/// Shared state handed to every tool call
#[derive(Clone)]
pub struct ToolContext {
    pub config: Arc<Config>,
    pub validator: Arc<CommandValidator>,
    pub history: Arc<CommandHistory>,
    pub pool: Arc<SessionPool>,
    pub executor: Arc<ShellExecutor>,
}

impl ToolContext {
    /// Build a context with the libssh2 transport
    pub fn new(config: Config) -> Self {
        let connector = Ssh2Connector::new(
            &config.ssh,
            ExecutionTimeout::from_secs(config.security.command_timeout).duration(),
        );
        Self::with_connector(config, Arc::new(connector))
    }

    /// Build a context with a custom session transport
    pub fn with_connector(config: Config, connector: Arc<dyn SessionConnector>) -> Self {
        let history = CommandHistory::new(
            config.security.log_commands,
            config.security.max_history_size,
        );
        Self {
            validator: Arc::new(CommandValidator::new(&config.security)),
            history: Arc::new(history),
            pool: Arc::new(SessionPool::new(connector)),
            executor: Arc::new(ShellExecutor::new()),
            config: Arc::new(config),
        }
    }

    /// The configured command timeout
    pub fn timeout(&self) -> ExecutionTimeout {
        ExecutionTimeout::from_secs(self.config.security.command_timeout)
    }

    /// Release every remote session
    pub async fn shutdown(&self) {
        self.pool.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::FakeConnector;

    #[test]
    fn test_context_follows_config() {
        let mut config = Config::default();
        config.security.log_commands = false;
        config.security.max_history_size = 7;
        config.security.command_timeout = 12;

        let ctx = ToolContext::with_connector(config, Arc::new(FakeConnector::new()));
        assert!(!ctx.history.is_enabled());
        assert_eq!(ctx.history.max_size(), 7);
        assert_eq!(ctx.timeout().seconds(), 12);
        assert_eq!(ctx.executor.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_pool() {
        let ctx = ToolContext::with_connector(Config::default(), Arc::new(FakeConnector::new()));
        let conn = crate::config::SshConnectionConfig {
            host: "h".into(),
            port: 22,
            username: "u".into(),
            password: Some("p".into()),
            private_key_path: None,
            passphrase: None,
        };
        let session = ctx.pool.get_session("h", &conn).await.unwrap();
        ctx.shutdown().await;
        assert!(!session.is_alive());
    }
}
