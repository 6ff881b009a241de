//! Tool server connection configuration
//!
//! Entries use the common `mcpServers` JSON shape:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "filesystem": { "command": "npx", "args": ["-y", "server-fs"] },
//!     "scanner": { "url": "https://scanner.internal/mcp", "headers": { "x-team": "sec" } }
//!   }
//! }
//! ```
//!
//! A `type` (or `transport`) field selects `stdio`, `sse` or `http`; a bare
//! `url` means streamable HTTP and a bare `command` means stdio.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ToolError;

/// Transport family, used for display and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable_http",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to reach a tool server
#[derive(Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Child process speaking newline-delimited JSON-RPC on stdin/stdout
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    /// Legacy HTTP+SSE: GET an event stream, POST to the announced endpoint
    Sse {
        url: String,
        headers: BTreeMap<String, String>,
    },
    /// Streamable HTTP: POST JSON-RPC, JSON or event-stream responses
    StreamableHttp {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
            TransportConfig::StreamableHttp { .. } => TransportKind::StreamableHttp,
        }
    }
}

/// Configuration of one named connection. Opaque to the streaming core.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawServerEntry", into = "RawServerEntry")]
pub struct ConnectionConfig {
    pub transport: TransportConfig,
    /// Sent as `Authorization: Bearer` unless a header already carries one
    pub api_key: Option<String>,
    pub disabled: bool,
    /// Import order: higher loads first
    pub priority: i32,
}

impl ConnectionConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            api_key: None,
            disabled: false,
            priority: 0,
        }
    }

    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(TransportConfig::Stdio {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        })
    }

    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self::new(TransportConfig::StreamableHttp {
            url: url.into(),
            headers: BTreeMap::new(),
        })
    }

    pub fn sse(url: impl Into<String>) -> Self {
        Self::new(TransportConfig::Sse {
            url: url.into(),
            headers: BTreeMap::new(),
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Check the entry is usable
    pub fn validate(&self) -> Result<(), ToolError> {
        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ToolError::InvalidConfig(
                        "stdio connection requires a command".into(),
                    ));
                }
            }
            TransportConfig::Sse { url, .. } | TransportConfig::StreamableHttp { url, .. } => {
                let parsed = reqwest::Url::parse(url)
                    .map_err(|e| ToolError::InvalidConfig(format!("invalid url '{}': {}", url, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ToolError::InvalidConfig(format!(
                        "unsupported url scheme '{}'",
                        parsed.scheme()
                    )));
                }
            }
        }
        Ok(())
    }

    /// HTTP headers for requests, including the bearer token if configured
    pub fn request_headers(&self) -> BTreeMap<String, String> {
        let mut headers = match &self.transport {
            TransportConfig::Sse { headers, .. } | TransportConfig::StreamableHttp { headers, .. } => {
                headers.clone()
            }
            TransportConfig::Stdio { .. } => BTreeMap::new(),
        };
        if let Some(key) = &self.api_key {
            let has_auth = headers
                .keys()
                .any(|name| name.eq_ignore_ascii_case("authorization"));
            if !has_auth {
                headers.insert("Authorization".to_string(), format!("Bearer {}", key));
            }
        }
        headers
    }

    /// Secret-free one-line summary, safe for logs
    pub fn describe(&self) -> String {
        match &self.transport {
            TransportConfig::Stdio { command, args, .. } => {
                format!("stdio: {} ({} args)", command, args.len())
            }
            TransportConfig::Sse { url, .. } => format!("sse: {}", strip_query(url)),
            TransportConfig::StreamableHttp { url, .. } => {
                format!("streamable_http: {}", strip_query(url))
            }
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("transport", &self.describe())
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("disabled", &self.disabled)
            .field("priority", &self.priority)
            .finish()
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// On-disk shape of one `mcpServers` entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawServerEntry {
    #[serde(rename = "type", alias = "transport", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(default, alias = "apiKey", skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    disabled: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    priority: i32,
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

impl TryFrom<RawServerEntry> for ConnectionConfig {
    type Error = ToolError;

    fn try_from(raw: RawServerEntry) -> Result<Self, Self::Error> {
        let kind = raw.kind.as_deref().map(|k| k.to_ascii_lowercase());
        let transport = match (kind.as_deref(), raw.command, raw.url) {
            (Some("stdio") | None, Some(command), _) => TransportConfig::Stdio {
                command,
                args: raw.args,
                env: raw.env,
            },
            (Some("sse"), _, Some(url)) => TransportConfig::Sse {
                url,
                headers: raw.headers,
            },
            (
                Some("http" | "streamable_http" | "streamable-http" | "streamablehttp") | None,
                _,
                Some(url),
            ) => TransportConfig::StreamableHttp {
                url,
                headers: raw.headers,
            },
            (Some(other @ ("stdio" | "sse" | "http" | "streamable_http" | "streamable-http" | "streamablehttp")), _, _) => {
                return Err(ToolError::InvalidConfig(format!(
                    "'{}' transport is missing its {}",
                    other,
                    if other == "stdio" { "command" } else { "url" }
                )))
            }
            (Some(other), _, _) => {
                return Err(ToolError::InvalidConfig(format!(
                    "unknown transport type '{}'",
                    other
                )))
            }
            (None, None, None) => {
                return Err(ToolError::InvalidConfig(
                    "server entry needs either 'url' or 'command'".into(),
                ))
            }
        };

        let config = ConnectionConfig {
            transport,
            api_key: raw.api_key,
            disabled: raw.disabled,
            priority: raw.priority,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<ConnectionConfig> for RawServerEntry {
    fn from(config: ConnectionConfig) -> Self {
        let mut raw = RawServerEntry {
            api_key: config.api_key,
            disabled: config.disabled,
            priority: config.priority,
            ..Default::default()
        };
        match config.transport {
            TransportConfig::Stdio { command, args, env } => {
                raw.command = Some(command);
                raw.args = args;
                raw.env = env;
            }
            TransportConfig::Sse { url, headers } => {
                raw.kind = Some("sse".into());
                raw.url = Some(url);
                raw.headers = headers;
            }
            TransportConfig::StreamableHttp { url, headers } => {
                raw.kind = Some("http".into());
                raw.url = Some(url);
                raw.headers = headers;
            }
        }
        raw
    }
}

/// Result of parsing an `mcpServers` document
#[derive(Debug, Default)]
pub struct ParsedServers {
    pub valid: BTreeMap<String, ConnectionConfig>,
    /// Entries that were skipped, with the reason
    pub invalid: Vec<(String, String)>,
}

/// Parse an `{"mcpServers": {...}}` document, keeping every valid entry
pub fn parse_servers_document(document: &Value) -> Result<ParsedServers, ToolError> {
    let servers = document
        .get("mcpServers")
        .and_then(Value::as_object)
        .ok_or_else(|| ToolError::InvalidConfig("missing 'mcpServers' object".into()))?;

    let mut parsed = ParsedServers::default();
    for (name, entry) in servers {
        if name.trim().is_empty() {
            parsed
                .invalid
                .push((name.clone(), "empty connection name".to_string()));
            continue;
        }
        match serde_json::from_value::<ConnectionConfig>(entry.clone()) {
            Ok(config) => {
                parsed.valid.insert(name.clone(), config);
            }
            Err(e) => {
                warn!(connection = %name, "Skipping invalid server entry: {}", e);
                parsed.invalid.push((name.clone(), e.to_string()));
            }
        }
    }
    Ok(parsed)
}

/// Build an `mcpServers` document from named configs
pub fn servers_document<'a, I>(entries: I) -> Result<Value, ToolError>
where
    I: IntoIterator<Item = (&'a str, &'a ConnectionConfig)>,
{
    let mut servers = Map::new();
    for (name, config) in entries {
        servers.insert(name.to_string(), serde_json::to_value(config)?);
    }
    let mut document = Map::new();
    document.insert("mcpServers".to_string(), Value::Object(servers));
    Ok(Value::Object(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stdio_and_http_entries() {
        let doc = json!({
            "mcpServers": {
                "fs": { "command": "npx", "args": ["-y", "server-fs"], "env": {"ROOT": "/tmp"} },
                "scanner": { "url": "https://scanner.internal/mcp", "headers": {"x-team": "sec"} },
                "legacy": { "type": "sse", "url": "http://localhost:8080/sse" }
            }
        });
        let parsed = parse_servers_document(&doc).unwrap();
        assert!(parsed.invalid.is_empty());
        assert_eq!(parsed.valid["fs"].kind(), TransportKind::Stdio);
        assert_eq!(parsed.valid["scanner"].kind(), TransportKind::StreamableHttp);
        assert_eq!(parsed.valid["legacy"].kind(), TransportKind::Sse);
    }

    #[test]
    fn test_entry_without_url_or_command_is_rejected() {
        let doc = json!({
            "mcpServers": {
                "good": { "url": "http://localhost:1/mcp" },
                "empty": { "headers": {"a": "b"} },
                "wrong": { "type": "carrier-pigeon", "url": "http://x" },
                "nourl": { "type": "sse", "command": "oops" }
            }
        });
        let parsed = parse_servers_document(&doc).unwrap();
        assert_eq!(parsed.valid.len(), 1);
        let mut names: Vec<&str> = parsed.invalid.iter().map(|(n, _)| n.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["empty", "nourl", "wrong"]);
    }

    #[test]
    fn test_missing_servers_key() {
        assert!(matches!(
            parse_servers_document(&json!({"servers": {}})),
            Err(ToolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = ConnectionConfig::streamable_http("ftp://files.example.com");
        assert!(config.validate().is_err());
        assert!(ConnectionConfig::streamable_http("not a url").validate().is_err());
        assert!(ConnectionConfig::stdio("  ", vec![]).validate().is_err());
    }

    #[test]
    fn test_api_key_becomes_bearer_header() {
        let config = ConnectionConfig::streamable_http("https://x.example/mcp").with_api_key("k-123");
        let headers = config.request_headers();
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer k-123"));

        let mut explicit = ConnectionConfig::streamable_http("https://x.example/mcp").with_api_key("k-123");
        if let TransportConfig::StreamableHttp { headers, .. } = &mut explicit.transport {
            headers.insert("authorization".into(), "Token abc".into());
        }
        let headers = explicit.request_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("authorization").map(String::as_str), Some("Token abc"));
    }

    #[test]
    fn test_debug_and_describe_hide_secrets() {
        let mut config = ConnectionConfig::streamable_http("https://x.example/mcp?token=abc")
            .with_api_key("super-secret");
        if let TransportConfig::StreamableHttp { headers, .. } = &mut config.transport {
            headers.insert("x-api-key".into(), "also-secret".into());
        }
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("also-secret"));
        assert!(!debug.contains("token=abc"));
        assert_eq!(config.describe(), "streamable_http: https://x.example/mcp");
    }

    #[test]
    fn test_export_shape_reparses() {
        let mut config = ConnectionConfig::sse("http://localhost:9000/sse").with_disabled(true);
        config.priority = 5;
        let doc = servers_document([("legacy", &config)]).unwrap();
        assert_eq!(doc["mcpServers"]["legacy"]["type"], "sse");
        assert_eq!(doc["mcpServers"]["legacy"]["disabled"], true);

        let stdio = ConnectionConfig::stdio("uvx", vec!["scanner".into()]);
        let doc = servers_document([("s", &stdio)]).unwrap();
        assert_eq!(doc["mcpServers"]["s"], json!({"command": "uvx", "args": ["scanner"]}));

        let parsed = parse_servers_document(&doc).unwrap();
        assert_eq!(parsed.valid["s"], stdio);
    }
}
