//! Execution Timeout Management
//!
//! This module provides timeout handling shared by local and remote execution.

use crate::error::{ExecError, Result};
use std::time::Duration;
use tokio::time;

/// Execution timeout configuration
///
/// Timeouts are enforced to prevent commands from hanging indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    /// The timeout duration
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::from_secs(30)
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use shellward::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.seconds(), 30);
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whole seconds, rounded up, as reported in timeout errors
    pub fn seconds(&self) -> u64 {
        let secs = self.duration.as_secs();
        if self.duration.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// The error reported when this timeout elapses
    pub fn error(&self) -> ExecError {
        ExecError::Timeout {
            seconds: self.seconds(),
        }
    }

    /// Execute a future with a timeout
    ///
    /// Returns the result of the future if it completes before the timeout,
    /// or [`ExecError::Timeout`] if the timeout expires. The future is
    /// dropped on expiry.
    pub async fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match time::timeout(self.duration, future).await {
            Ok(result) => result,
            Err(_) => Err(self.error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_default() {
        let timeout = ExecutionTimeout::default();
        assert_eq!(timeout.duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_timeout_from_secs() {
        let timeout = ExecutionTimeout::from_secs(45);
        assert_eq!(timeout.duration(), Duration::from_secs(45));
        assert_eq!(timeout.seconds(), 45);
    }

    #[test]
    fn test_timeout_seconds_round_up() {
        let timeout = ExecutionTimeout::new(Duration::from_millis(1500));
        assert_eq!(timeout.seconds(), 2);
    }

    #[tokio::test]
    async fn test_timeout_run_success() {
        let timeout = ExecutionTimeout::from_secs(5);

        let result = timeout
            .run(async { Ok::<_, ExecError>("test value".to_string()) })
            .await;

        assert_eq!(result.unwrap(), "test value");
    }

    #[tokio::test]
    async fn test_timeout_run_timeout() {
        let timeout = ExecutionTimeout::from_secs(1);

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<(), ExecError>(())
            })
            .await;

        assert_eq!(result.unwrap_err(), ExecError::Timeout { seconds: 1 });
    }

    #[tokio::test]
    async fn test_timeout_run_future_error() {
        let timeout = ExecutionTimeout::from_secs(5);

        let result = timeout
            .run(async { Err::<(), _>(ExecError::Process("Test error".into())) })
            .await;

        assert!(result.unwrap_err().to_string().contains("Test error"));
    }

    #[tokio::test]
    async fn test_timeout_run_just_in_time() {
        let timeout = ExecutionTimeout::from_secs(1);

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<(), ExecError>(())
            })
            .await;

        assert!(result.is_ok());
    }
}
