//! MCP Server
//!
//! Request loop over a [`MessageReader`]/[`MessageWriter`] pair. Each
//! `tools/call` runs on its own task; one writer task owns the output
//! stream, so responses never interleave mid-line.

use crate::context::ToolContext;
use crate::handlers::{self, ToolOutput};
use crate::mcp::catalog;
use crate::mcp::protocol::{
    CallToolResult, Content, InitializeResult, McpError, McpMethod, McpRequest, McpResponse,
    ToolCallParams,
};
use crate::mcp::transport::{Incoming, MessageReader, MessageWriter};
use crate::metrics;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

/// Why the request loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The client closed its end; in-flight calls were allowed to finish
    EndOfInput,

    /// The shutdown future resolved; in-flight calls were aborted
    Shutdown,
}

/// MCP server over the tool context
#[derive(Clone)]
pub struct McpServer {
    ctx: ToolContext,
}

impl McpServer {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Serve until end of input or until `shutdown` resolves
    ///
    /// Does not close remote sessions; the caller owns teardown.
    pub async fn serve<R, W, S>(&self, reader: R, writer: W, shutdown: S) -> Result<StopReason>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        // Line reads are not cancel-safe, so they live on their own task.
        let (in_tx, mut in_rx) = mpsc::channel::<Incoming>(64);
        let reader_task = tokio::spawn(async move {
            let mut reader = MessageReader::new(reader);
            loop {
                match reader.next_message().await {
                    Ok(Some(incoming)) => {
                        if in_tx.send(incoming).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read request: {:#}", e);
                        break;
                    }
                }
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<McpResponse>();

        let writer_task = tokio::spawn(async move {
            let mut writer = MessageWriter::new(writer);
            while let Some(response) = rx.recv().await {
                if let Err(e) = writer.send(&response).await {
                    error!("Failed to write response: {:#}", e);
                    break;
                }
            }
        });

        let mut calls = InFlight::new();
        tokio::pin!(shutdown);

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => break StopReason::Shutdown,
                Some(failed) = calls.join_next(), if !calls.is_empty() => {
                    if let Some(response) = failed {
                        let _ = tx.send(response);
                    }
                }
                incoming = in_rx.recv() => match incoming {
                    Some(Incoming::Request(request)) => {
                        if McpMethod::from(request.method.as_str()) == McpMethod::ToolsCall {
                            let server = self.clone();
                            let tx = tx.clone();
                            let request_id = request.id.clone().unwrap_or(Value::Null);
                            calls.spawn(request_id, async move {
                                if let Some(response) = server.handle(request).await {
                                    let _ = tx.send(response);
                                }
                            });
                        } else if let Some(response) = self.handle(request).await {
                            let _ = tx.send(response);
                        }
                    }
                    Some(Incoming::Malformed { id, error }) => {
                        warn!("Rejected malformed message: {}", error);
                        let _ = tx.send(McpResponse::err(id, error));
                    }
                    None => break StopReason::EndOfInput,
                },
            }
        };
        reader_task.abort();

        match reason {
            StopReason::EndOfInput => {
                info!("Client closed input, finishing {} in-flight call(s)", calls.len());
                while let Some(failed) = calls.join_next().await {
                    if let Some(response) = failed {
                        let _ = tx.send(response);
                    }
                }
            }
            StopReason::Shutdown => {
                info!("Shutdown requested, aborting {} in-flight call(s)", calls.len());
                calls.shutdown().await;
            }
        }

        drop(tx);
        let _ = writer_task.await;
        Ok(reason)
    }

    /// Answer one request; `None` for notifications
    pub async fn handle(&self, request: McpRequest) -> Option<McpResponse> {
        let method = McpMethod::from(request.method.as_str());
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "Notification received");
            return None;
        };

        let outcome = match method {
            McpMethod::Initialize => {
                info!("Client initialized");
                serde_json::to_value(InitializeResult::default())
                    .map_err(|e| McpError::internal_error(e.to_string()))
            }
            McpMethod::ToolsList => Ok(json!({ "tools": catalog::tools(&self.ctx.config) })),
            McpMethod::ToolsCall => self.call_tool(request.params).await,
            McpMethod::Ping => Ok(json!({})),
            McpMethod::Notification(name) | McpMethod::Unknown(name) => {
                Err(McpError::method_not_found(name))
            }
        };

        Some(match outcome {
            Ok(result) => McpResponse::ok(id, result),
            Err(error) => McpResponse::err(id, error),
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params: ToolCallParams = parse(params.unwrap_or(Value::Null))?;
        let name = params.name;
        let arguments = params.arguments;
        debug!(tool = %name, "Tool call");

        let outcome = match name.as_str() {
            catalog::EXECUTE_COMMAND => handlers::run_local(&self.ctx, parse(arguments)?).await,
            catalog::GET_COMMAND_HISTORY => handlers::get_history(&self.ctx, parse(arguments)?),
            catalog::SSH_EXECUTE => handlers::run_remote(&self.ctx, parse(arguments)?).await,
            catalog::SSH_DISCONNECT => handlers::close_remote(&self.ctx, parse(arguments)?).await,
            _ => {
                metrics::MCP_TOOL_CALLS_TOTAL
                    .with_label_values(&["unknown", "error"])
                    .inc();
                return Err(McpError::new(-32601, format!("Unknown tool: {}", name)));
            }
        };

        let status = match &outcome {
            Ok(output) if !output.is_error => "success",
            Ok(_) => "failure",
            Err(_) => "error",
        };
        metrics::MCP_TOOL_CALLS_TOTAL
            .with_label_values(&[name.as_str(), status])
            .inc();

        let output = outcome.map_err(McpError::from)?;
        serde_json::to_value(to_call_result(output))
            .map_err(|e| McpError::internal_error(e.to_string()))
    }
}

/// Tool calls running on their own tasks
///
/// Remembers which request each task serves, so a task that dies without
/// replying can still be answered.
struct InFlight {
    tasks: JoinSet<()>,
    request_ids: HashMap<task::Id, Value>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            request_ids: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn spawn<F>(&mut self, request_id: Value, call: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.tasks.spawn(call);
        self.request_ids.insert(handle.id(), request_id);
    }

    /// Wait for the next task; `None` once empty
    ///
    /// The inner value is the error reply owed for a task that panicked.
    async fn join_next(&mut self) -> Option<Option<McpResponse>> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(match joined {
            Ok((id, ())) => {
                self.request_ids.remove(&id);
                None
            }
            Err(e) => {
                let request_id = self.request_ids.remove(&e.id()).unwrap_or(Value::Null);
                if e.is_cancelled() {
                    None
                } else {
                    error!(request_id = %request_id, "Tool call task failed: {}", e);
                    Some(McpResponse::err(
                        request_id,
                        McpError::internal_error("Tool call failed unexpectedly"),
                    ))
                }
            }
        })
    }

    async fn shutdown(&mut self) {
        self.tasks.shutdown().await;
        self.request_ids.clear();
    }
}

fn to_call_result(output: ToolOutput) -> CallToolResult {
    CallToolResult {
        content: vec![Content::Text { text: output.text }],
        is_error: output.is_error,
        meta: (!output.metadata.is_null()).then_some(output.metadata),
    }
}

// Omitted arguments read as an empty object.
fn parse<T: DeserializeOwned>(value: Value) -> Result<T, McpError> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value)
        .map_err(|e| McpError::invalid_params(format!("Invalid params: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ssh::testing::FakeConnector;
    use std::sync::Arc;

    fn server() -> McpServer {
        let ctx = ToolContext::with_connector(Config::default(), Arc::new(FakeConnector::new()));
        McpServer::new(ctx)
    }

    #[tokio::test]
    async fn test_panicked_call_is_answered_with_internal_error() {
        let mut calls = InFlight::new();
        calls.spawn(json!(9), async {
            panic!("handler bug");
        });

        let response = calls.join_next().await.unwrap().unwrap();
        assert_eq!(response.id, json!(9));
        assert_eq!(response.into_result().unwrap_err().code, -32603);
        assert!(calls.is_empty());
        assert!(calls.request_ids.is_empty());
    }

    #[tokio::test]
    async fn test_finished_call_owes_no_reply() {
        let mut calls = InFlight::new();
        calls.spawn(json!(1), async {});

        assert!(calls.join_next().await.unwrap().is_none());
        assert!(calls.join_next().await.is_none());
        assert!(calls.request_ids.is_empty());
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = server()
            .handle(McpRequest::new(1, "initialize", Some(json!({}))))
            .await
            .unwrap();
        let result = response.into_result().unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let response = server()
            .handle(McpRequest::notification("notifications/initialized"))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = server()
            .handle(McpRequest::new(2, "resources/list", None))
            .await
            .unwrap();
        assert_eq!(response.into_result().unwrap_err().code, -32601);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let response = server()
            .handle(McpRequest::new(
                3,
                "tools/call",
                Some(json!({"name": "format_disk", "arguments": {}})),
            ))
            .await
            .unwrap();
        let err = response.into_result().unwrap_err();
        assert!(err.message.contains("format_disk"));
    }

    #[tokio::test]
    async fn test_missing_tool_arguments_are_invalid_params() {
        let response = server()
            .handle(McpRequest::new(
                4,
                "tools/call",
                Some(json!({"name": "execute_command", "arguments": {"shell": "sh"}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.into_result().unwrap_err().code, -32602);
    }

    #[tokio::test]
    async fn test_history_without_arguments() {
        let response = server()
            .handle(McpRequest::new(
                5,
                "tools/call",
                Some(json!({"name": "get_command_history"})),
            ))
            .await
            .unwrap();
        let result = response.into_result().unwrap();
        assert_eq!(result["content"][0]["text"], "[]");
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn test_ssh_disabled_is_invalid_params_with_kind() {
        let response = server()
            .handle(McpRequest::new(
                6,
                "tools/call",
                Some(json!({"name": "ssh_execute", "arguments": {"connectionId": "pi", "command": "uptime"}})),
            ))
            .await
            .unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code, -32602);
        assert_eq!(err.data.unwrap()["kind"], "feature_disabled");
        assert_eq!(err.message, "SSH support is disabled in configuration");
    }
}
