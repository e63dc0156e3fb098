//! Command Execution Subsystem
//!
//! Local execution under the security policy.
//!
//! # Architecture
//!
//! The module is organized into:
//! - `validator.rs`: policy checks on command text and working directories
//! - `executor.rs`: shell subprocess execution with timeout handling
//! - `timeout.rs`: timeout management shared with remote execution
//! - `history.rs`: bounded command history ledger
//!
//! # Example
//!
//! ```no_run
//! use shellward::config::Config;
//! use shellward::tools::{resolve_working_directory, CommandValidator, ExecutionTimeout, ShellExecutor};
//!
//! #[tokio::main]
//! async fn main() -> shellward::error::Result<()> {
//!     let config = Config::default();
//!     let validator = CommandValidator::new(&config.security);
//!     validator.validate("ls -la", &config.shells.sh)?;
//!
//!     let cwd = resolve_working_directory(None, &config.security)?;
//!     let result = ShellExecutor::new()
//!         .execute(&config.shells.sh, "ls -la", &cwd, ExecutionTimeout::from_secs(30))
//!         .await?;
//!     println!("{}", result.render());
//!     Ok(())
//! }
//! ```

mod executor;
mod history;
mod timeout;
mod validator;

pub use executor::{ExecutionResult, ShellExecutor, MAX_OUTPUT_SIZE};
pub(crate) use executor::truncate_string;
pub use history::{CommandHistory, HistoryEntry, DEFAULT_QUERY_LIMIT, QUERY_OUTPUT_CAP};
pub use timeout::ExecutionTimeout;
pub use validator::{resolve_working_directory, CommandValidator};
