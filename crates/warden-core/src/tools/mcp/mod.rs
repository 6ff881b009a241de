//! Minimal MCP client
//!
//! Enough of the tool-server protocol for probing and invoking tools:
//! `initialize`, `ping`, `tools/list`, `resources/list` and `tools/call`,
//! over stdio, streamable HTTP or legacy HTTP+SSE.

mod http;
pub(crate) mod jsonrpc;
mod stdio;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::constants;
use crate::error::ToolError;

use self::http::{SseChannel, StreamableHttpChannel};
use self::jsonrpc::{initialize_params, parse_names, METHOD_NOT_FOUND};
use self::stdio::StdioChannel;
use super::config::{ConnectionConfig, TransportConfig};
use super::transport::{ToolConnector, ToolSession};

/// Upper bound on list pagination
const MAX_PAGES: usize = 20;

/// Request/notification exchange over one transport
#[async_trait]
pub(crate) trait RpcChannel: Send {
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, ToolError>;

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), ToolError>;

    async fn shutdown(&mut self);
}

/// Initialized protocol session over any channel
struct McpSession<C: RpcChannel> {
    name: String,
    channel: C,
}

impl<C: RpcChannel> McpSession<C> {
    async fn initialize(name: &str, mut channel: C) -> Result<Self, ToolError> {
        let result = channel
            .request("initialize", Some(initialize_params()))
            .await?;
        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        channel.notify("notifications/initialized", None).await?;
        info!(connection = %name, server, protocol = version, "Tool server initialized");

        Ok(Self {
            name: name.to_string(),
            channel,
        })
    }

    async fn list_names(&mut self, method: &str, key: &str) -> Result<Vec<String>, ToolError> {
        let mut names = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.channel.request(method, Some(params)).await?;
            let (page, next) = parse_names(&result, key)?;
            names.extend(page);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl<C: RpcChannel> ToolSession for McpSession<C> {
    async fn ping(&mut self) -> Result<(), ToolError> {
        match self.channel.request("ping", None).await {
            Ok(_) => Ok(()),
            // An error response still proves the server is alive
            Err(ToolError::Remote { code, message }) => {
                debug!(connection = %self.name, code, "Ping answered with error: {}", message);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_tools(&mut self) -> Result<Vec<String>, ToolError> {
        self.list_names("tools/list", "tools").await
    }

    async fn list_resources(&mut self) -> Result<Vec<String>, ToolError> {
        match self.list_names("resources/list", "resources").await {
            Err(ToolError::Remote { code, .. }) if code == METHOD_NOT_FOUND => Ok(Vec::new()),
            other => other,
        }
    }

    async fn call_tool(&mut self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        self.channel
            .request(
                "tools/call",
                Some(json!({ "name": tool, "arguments": arguments })),
            )
            .await
    }

    async fn close(&mut self) {
        self.channel.shutdown().await;
    }
}

/// Opens real protocol sessions
#[derive(Clone)]
pub struct McpConnector {
    client: Client,
}

impl McpConnector {
    pub fn new() -> Result<Self, ToolError> {
        Self::with_connect_timeout(constants::generation::CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ToolConnector for McpConnector {
    async fn connect(
        &self,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn ToolSession>, ToolError> {
        config.validate()?;
        let headers = config.request_headers();
        match &config.transport {
            TransportConfig::Stdio { command, args, env } => {
                let channel = StdioChannel::spawn(name, command, args, env)?;
                Ok(Box::new(McpSession::initialize(name, channel).await?))
            }
            TransportConfig::StreamableHttp { url, .. } => {
                let channel = StreamableHttpChannel::new(name, self.client.clone(), url, &headers)?;
                Ok(Box::new(McpSession::initialize(name, channel).await?))
            }
            TransportConfig::Sse { url, .. } => {
                let channel = SseChannel::connect(name, self.client.clone(), url, &headers).await?;
                Ok(Box::new(McpSession::initialize(name, channel).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_missing_command_is_connect_error() {
        let connector = McpConnector::new().unwrap();
        let config = ConnectionConfig::stdio("warden-no-such-tool-server-binary", vec![]);
        match connector.connect("ghost", &config).await {
            Err(ToolError::Connect(msg)) => assert!(msg.contains("failed to spawn")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("connected to a missing binary"),
        }
    }

    #[tokio::test]
    async fn test_refused_port_fails_fast() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = McpConnector::new().unwrap();
        let config = ConnectionConfig::streamable_http(format!("http://{}/mcp", addr));
        let started = Instant::now();
        assert!(connector.connect("closed", &config).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    /// Read one HTTP request; returns the lowercased head and the body
    async fn read_request(stream: &mut TcpStream) -> (String, String) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let head = text[..split].to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= split + 4 + len {
                    return (head, text[split + 4..split + 4 + len].to_string());
                }
            }
            if n == 0 {
                return (String::new(), String::new());
            }
        }
    }

    /// JSON-RPC reply to a request body, `None` for notifications
    fn reply_to(request: &Value) -> Option<String> {
        let id = request.get("id")?;
        let result = match request["method"].as_str().unwrap_or("") {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "fake", "version": "0"},
                "capabilities": {}
            }),
            "tools/list" => json!({"tools": [{"name": "scan_host"}]}),
            "tools/call" => json!({
                "content": [{"type": "text", "text": "2 hosts up"}],
                "isError": false
            }),
            _ => json!({}),
        };
        Some(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
    }

    /// Serves `count` HTTP requests, answering each JSON-RPC request inline
    async fn serve_jsonrpc(listener: TcpListener, count: usize) -> Vec<String> {
        let mut seen = Vec::new();
        for _ in 0..count {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (_, body) = read_request(&mut stream).await;
            let request: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            seen.push(request["method"].as_str().unwrap_or("").to_string());

            let response = reply_to(&request).unwrap_or_default();
            let status = if response.is_empty() { "202 Accepted" } else { "200 OK" };
            let reply = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\nmcp-session-id: s-1\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                response.len(),
                response
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
        seen
    }

    /// Legacy server: one GET event stream carries every response, POSTs
    /// only get `202 Accepted`
    async fn serve_legacy_sse(listener: TcpListener, posts: usize) -> Vec<String> {
        let (mut events, _) = listener.accept().await.unwrap();
        let (head, _) = read_request(&mut events).await;
        assert!(head.starts_with("get /sse"), "unexpected request: {}", head);
        events
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\n\r\n")
            .await
            .unwrap();
        events
            .write_all(b": connected\n\nevent: endpoint\ndata: /messages?session_id=s-1\n\n")
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..posts {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (head, body) = read_request(&mut stream).await;
            assert!(
                head.starts_with("post /messages?session_id=s-1"),
                "unexpected request: {}",
                head
            );
            let request: Value = serde_json::from_str(&body).unwrap();
            seen.push(request["method"].as_str().unwrap_or("").to_string());

            stream
                .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            stream.shutdown().await.ok();

            if let Some(reply) = reply_to(&request) {
                let frame = format!("event: message\ndata: {}\n\n", reply);
                events.write_all(frame.as_bytes()).await.unwrap();
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_streamable_http_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // initialize, initialized, tools/list, tools/call, DELETE
        let server = tokio::spawn(serve_jsonrpc(listener, 5));

        let connector = McpConnector::new().unwrap();
        let config = ConnectionConfig::streamable_http(format!("http://{}/mcp", addr));
        let mut session = connector.connect("fake", &config).await.unwrap();

        assert_eq!(session.list_tools().await.unwrap(), vec!["scan_host"]);
        let result = session
            .call_tool("scan_host", json!({"target": "10.0.0.1"}))
            .await
            .unwrap();
        assert_eq!(result["isError"], false);
        session.close().await;

        let seen = server.await.unwrap();
        assert_eq!(
            &seen[..4],
            &["initialize", "notifications/initialized", "tools/list", "tools/call"]
        );
    }

    #[tokio::test]
    async fn test_legacy_sse_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // initialize, initialized, tools/list, tools/call
        let server = tokio::spawn(serve_legacy_sse(listener, 4));

        let connector = McpConnector::new().unwrap();
        let config = ConnectionConfig::sse(format!("http://{}/sse", addr));
        let mut session = connector.connect("legacy", &config).await.unwrap();

        assert_eq!(session.list_tools().await.unwrap(), vec!["scan_host"]);
        let result = session
            .call_tool("scan_host", json!({"target": "10.0.0.1"}))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "2 hosts up");
        session.close().await;

        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            vec!["initialize", "notifications/initialized", "tools/list", "tools/call"]
        );
    }
}
