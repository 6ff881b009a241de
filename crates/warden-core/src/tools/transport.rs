//! Network seam of the tool layer
//!
//! The manager only talks to these traits; `mcp::McpConnector` is the real
//! implementation, tests plug in in-memory connectors.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;

use super::config::ConnectionConfig;

/// An initialized session with one tool server
#[async_trait]
pub trait ToolSession: Send {
    /// Cheap liveness check
    async fn ping(&mut self) -> Result<(), ToolError>;

    async fn list_tools(&mut self) -> Result<Vec<String>, ToolError>;

    async fn list_resources(&mut self) -> Result<Vec<String>, ToolError>;

    /// Invoke a tool, returning the server's raw result object
    async fn call_tool(&mut self, tool: &str, arguments: Value) -> Result<Value, ToolError>;

    /// Release the session (terminate the child, end the HTTP session)
    async fn close(&mut self);
}

/// Opens sessions from connection configs
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn ToolSession>, ToolError>;
}
