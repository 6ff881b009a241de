//! External tool connections
//!
//! A registry of named tool servers with a cheap cached status read and an
//! explicit, time-bounded probe. Sessions are opened per operation through
//! the [`ToolConnector`] seam; [`McpConnector`] speaks the real protocol.

pub mod config;
pub mod connection;
pub mod manager;
pub mod mcp;
pub mod transport;

pub use config::{
    parse_servers_document, servers_document, ConnectionConfig, ParsedServers, TransportConfig,
    TransportKind,
};
pub use connection::{ConnectionSnapshot, ConnectionStatus, ProbeResult, ToolCatalog, ToolConnection};
pub use manager::{ImportReport, ProbeOptions, ToolConnectivityManager};
pub use mcp::McpConnector;
pub use transport::{ToolConnector, ToolSession};
