//! MCP (Model Context Protocol) Server Implementation
//!
//! Exposes the command tools to an MCP client over stdio, built directly
//! on Tokio and Serde (no external SDK).
//!
//! # Architecture
//!
//! The implementation is organized into four layers:
//!
//! 1. **Protocol Layer** (`protocol`): JSON-RPC 2.0 message types
//! 2. **Transport Layer** (`transport`): newline-delimited framing
//! 3. **Catalog** (`catalog`): tool names and input schemas
//! 4. **Server Layer** (`server`): request loop and tool dispatch

// Protocol layer: JSON-RPC 2.0 message types
pub mod protocol;

// Transport layer: line framing over any async byte stream
pub mod transport;

// Tool definitions
pub mod catalog;

// Server layer: request loop
pub mod server;

// Re-export commonly used types for convenience
pub use protocol::{
    CallToolResult, Content, InitializeResult, McpError, McpMethod, McpRequest, McpResponse,
    ServerInfo, Tool, ToolCallParams,
};
pub use server::{McpServer, StopReason};
pub use transport::{Incoming, MessageReader, MessageWriter};
