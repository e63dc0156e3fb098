//! MCP Transport Layer
//!
//! Newline-delimited JSON-RPC over a byte stream: stdin/stdout in
//! production, in-memory pipes in tests. Each line is one message.
//!
//! # Architecture
//!
//! The transport layer is responsible only for framing and decoding.
//! Method dispatch is handled in the server layer.

use crate::mcp::protocol::{McpError, McpRequest, McpResponse, JSONRPC_VERSION};
use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// One decoded inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A well-formed request or notification
    Request(McpRequest),

    /// A line that is not a valid request; answer with this error
    Malformed { id: Value, error: McpError },
}

/// Reads newline-delimited messages
pub struct MessageReader<R> {
    reader: BufReader<R>,

    /// Reusable buffer for reading lines
    line_buffer: String,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line_buffer: String::with_capacity(4096),
        }
    }

    /// Read the next message
    ///
    /// Returns `Ok(None)` at end of stream. Blank lines are skipped.
    pub async fn next_message(&mut self) -> Result<Option<Incoming>> {
        loop {
            self.line_buffer.clear();
            let bytes_read = self
                .reader
                .read_line(&mut self.line_buffer)
                .await
                .context("Failed to read from MCP client")?;

            // Check for EOF
            if bytes_read == 0 {
                return Ok(None);
            }

            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            tracing::debug!("Received from MCP client: {}", line);
            return Ok(Some(decode(line)));
        }
    }
}

/// Decode one line into a request or a ready-made error
pub fn decode(line: &str) -> Incoming {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return Incoming::Malformed {
                id: Value::Null,
                error: McpError::parse_error(format!("Parse error: {}", e)),
            }
        }
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    match serde_json::from_value::<McpRequest>(value) {
        Ok(request) if request.jsonrpc == JSONRPC_VERSION => Incoming::Request(request),
        Ok(request) => Incoming::Malformed {
            id,
            error: McpError::invalid_request(format!(
                "Unsupported jsonrpc version: {}",
                request.jsonrpc
            )),
        },
        Err(e) => Incoming::Malformed {
            id,
            error: McpError::invalid_request(format!("Invalid request: {}", e)),
        },
    }
}

/// Writes newline-delimited responses
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Send one response as a single JSON line
    pub async fn send(&mut self, response: &McpResponse) -> Result<()> {
        let json =
            serde_json::to_string(response).context("Failed to serialize MCP response to JSON")?;

        tracing::debug!("Sending to MCP client: {}", json);

        self.writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write to MCP client")?;

        // Write newline (JSON-RPC uses line-based protocol)
        self.writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to MCP client")?;

        // Flush to ensure the message is sent immediately
        self.writer
            .flush()
            .await
            .context("Failed to flush MCP client stream")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_decode_request() {
        let incoming = decode(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#);
        match incoming {
            Incoming::Request(req) => {
                assert_eq!(req.id, Some(json!(3)));
                assert_eq!(req.method, "ping");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_json() {
        match decode("{not json") {
            Incoming::Malformed { id, error } => {
                assert_eq!(id, Value::Null);
                assert_eq!(error.code, -32700);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_method_keeps_id() {
        match decode(r#"{"jsonrpc":"2.0","id":9}"#) {
            Incoming::Malformed { id, error } => {
                assert_eq!(id, json!(9));
                assert_eq!(error.code, -32600);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_wrong_version() {
        match decode(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#) {
            Incoming::Malformed { error, .. } => assert_eq!(error.code, -32600),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reader_skips_blank_lines_and_reports_eof() {
        let input = b"\n\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n".to_vec();
        let mut reader = MessageReader::new(&input[..]);

        let first = reader.next_message().await.unwrap();
        assert!(matches!(first, Some(Incoming::Request(ref r)) if r.is_notification()));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_emits_one_line_per_response() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = MessageWriter::new(server);
        writer
            .send(&McpResponse::ok(json!(1), json!({})))
            .await
            .unwrap();
        writer
            .send(&McpResponse::ok(json!(2), json!({})))
            .await
            .unwrap();
        drop(writer);

        let mut out = String::new();
        let mut client = client;
        client.read_to_string(&mut out).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"id\":2"));
    }
}
