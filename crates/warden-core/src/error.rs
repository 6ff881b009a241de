//! Error types for the streaming pipeline and tool connectivity layer
//!
//! Recoverable faults become typed events or data; only [`BridgeError`]
//! is allowed to abort a session outright.

use std::time::Duration;

use thiserror::Error;

/// Failure inside the event producer. Surfaces as a single `error` event.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The text-generation collaborator failed
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// A tool could not be dispatched
    #[error("tool invocation failed: {0}")]
    Tool(#[from] ToolError),

    /// The session exceeded its configured duration
    #[error("session timed out after {0:?}")]
    Timeout(Duration),
}

impl ProducerError {
    /// Stable category string carried by the `error` event
    pub fn error_type(&self) -> &'static str {
        match self {
            ProducerError::Generation(GenerationError::Timeout(_)) => "GenerationTimeout",
            ProducerError::Generation(_) => "GenerationError",
            ProducerError::Tool(ToolError::NotFound(_)) => "ToolNotFound",
            ProducerError::Tool(_) => "ToolError",
            ProducerError::Timeout(_) => "Timeout",
        }
    }
}

/// Scheduling-level fault. Fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The producer task panicked
    #[error("producer task panicked: {0}")]
    ProducerPanicked(String),

    /// The producer task was aborted before it finished
    #[error("producer task aborted")]
    ProducerAborted,

    /// The event channel closed without a terminal event
    #[error("event stream ended without a terminal event")]
    Truncated,
}

/// Returned by event emission when nobody is listening anymore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event consumer is gone")]
pub struct ConsumerGone;

/// Tool registry and transport errors
#[derive(Debug, Error)]
pub enum ToolError {
    /// No connection registered under that name
    #[error("tool connection not found: {0}")]
    NotFound(String),

    /// A connection with that name already exists
    #[error("tool connection already exists: {0}")]
    AlreadyExists(String),

    /// The connection is disabled in its configuration
    #[error("tool connection is disabled: {0}")]
    Disabled(String),

    /// The connection configuration is unusable
    #[error("invalid connection config: {0}")]
    InvalidConfig(String),

    /// Could not establish a session
    #[error("connect failed: {0}")]
    Connect(String),

    /// The peer violated the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation exceeded its bound
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with a JSON-RPC error
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Text generation errors
#[derive(Debug, Error)]
pub enum GenerationError {
    /// No endpoint or key configured
    #[error("generation not configured: {0}")]
    NotConfigured(String),

    /// Transport-level failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Malformed stream payload
    #[error("stream error: {0}")]
    Stream(String),

    /// Request exceeded the configured overall timeout
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Conversation store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure to deliver a wire message to the client
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("client disconnected")]
    Disconnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
