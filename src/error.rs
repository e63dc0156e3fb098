//! Execution Error Types
//!
//! Every failure the execution core can surface to a caller. Command-level
//! failures (a process that runs and exits non-zero) are NOT errors; they are
//! ordinary results with a non-zero exit code.

/// Result type for execution operations
pub type Result<T> = std::result::Result<T, ExecError>;

/// Error types for command execution and remote sessions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    /// Blocked operator, command, argument or working directory
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Spawn failure or abnormal child termination
    #[error("Process error: {0}")]
    Process(String),

    /// Command exceeded the configured timeout
    #[error("Command execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Remote authentication, network or protocol failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Feature switched off in configuration
    #[error("{0}")]
    FeatureDisabled(String),

    /// Connection id not present in configuration
    #[error("Unknown SSH connection ID: {0}")]
    UnknownConnection(String),

    /// Shell kind not configured or not enabled
    #[error("Shell '{0}' is not available")]
    ShellUnavailable(String),

    /// Malformed tool arguments
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl ExecError {
    /// Stable snake_case identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::PolicyViolation(_) => "policy_violation",
            ExecError::Process(_) => "process_error",
            ExecError::Timeout { .. } => "timeout",
            ExecError::Connection(_) => "connection_error",
            ExecError::FeatureDisabled(_) => "feature_disabled",
            ExecError::UnknownConnection(_) => "unknown_connection_id",
            ExecError::ShellUnavailable(_) => "shell_unavailable",
            ExecError::InvalidArguments(_) => "invalid_arguments",
        }
    }

    /// Whether the error was raised before any process or session work
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ExecError::PolicyViolation(_)
                | ExecError::FeatureDisabled(_)
                | ExecError::UnknownConnection(_)
                | ExecError::ShellUnavailable(_)
                | ExecError::InvalidArguments(_)
        )
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Process(err.to_string())
    }
}

impl From<ssh2::Error> for ExecError {
    fn from(err: ssh2::Error) -> Self {
        ExecError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ExecError::PolicyViolation("x".into()).kind(),
            "policy_violation"
        );
        assert_eq!(ExecError::Timeout { seconds: 3 }.kind(), "timeout");
        assert_eq!(
            ExecError::UnknownConnection("pi".into()).kind(),
            "unknown_connection_id"
        );
    }

    #[test]
    fn test_timeout_message_names_duration() {
        let err = ExecError::Timeout { seconds: 30 };
        assert_eq!(
            err.to_string(),
            "Command execution timed out after 30 seconds"
        );
    }

    #[test]
    fn test_input_errors() {
        assert!(ExecError::PolicyViolation("del".into()).is_input_error());
        assert!(ExecError::FeatureDisabled("ssh".into()).is_input_error());
        assert!(!ExecError::Process("spawn".into()).is_input_error());
        assert!(!ExecError::Connection("refused".into()).is_input_error());
        assert!(!ExecError::Timeout { seconds: 1 }.is_input_error());
    }

    #[test]
    fn test_io_error_maps_to_process() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: ExecError = io.into();
        assert!(matches!(err, ExecError::Process(_)));
    }
}
