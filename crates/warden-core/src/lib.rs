//! Warden Core - streamed agent execution and tool connectivity
//!
//! This crate provides the pipeline behind a streamed security-assistant
//! session:
//! - Event producer running a task against tools and a text generator
//! - Token buffering of generator fragments into delta chunks
//! - Bridge from the async producer to a blocking, pull-based consumer
//! - Transport encoding with exactly-once answer persistence
//! - Registry of named tool connections with cached and probed status

pub mod agent;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod generation;
pub mod sse;
pub mod store;
pub mod stream;
pub mod tools;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use agent::{AgentExecutor, Task, TaskAction};
pub use config::WardenConfig;
pub use error::{BridgeError, GenerationError, ProducerError, ToolError};
pub use events::{Event, EventKind, EventPayload, FinalStatus};
pub use generation::{OpenAiCompatibleGenerator, TextGenerator};
pub use store::{ConversationStore, MemoryConversationStore};
pub use stream::{serve_session, BridgeConfig, StreamBridge, StreamSession, TransportEncoder};
pub use tools::{ConnectionConfig, McpConnector, ProbeOptions, ToolConnectivityManager};
