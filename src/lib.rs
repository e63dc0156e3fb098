//! Shellward Library
//!
//! Policy-gated command execution on the local host and over pooled SSH
//! sessions, with a bounded command history, exposed as MCP tools.

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod mcp;
pub mod metrics;
pub mod metrics_server;
pub mod ssh;
pub mod tools;

pub use context::ToolContext;
pub use error::{ExecError, Result};
