//! Per-request stream session state

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

/// State for one client request's streamed response
#[derive(Debug)]
pub struct StreamSession {
    pub id: String,
    pub conversation_id: String,
    pub message_id: String,
    /// Concatenated `delta` text, in arrival order
    accumulated: String,
    status: SessionStatus,
    pub started_at: DateTime<Utc>,
    /// A store write was attempted; never more than one per session
    persist_attempted: bool,
    /// The store accepted the answer
    persisted: bool,
    /// The client stopped accepting messages
    disconnected: bool,
}

impl StreamSession {
    pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            accumulated: String::new(),
            status: SessionStatus::Running,
            started_at: Utc::now(),
            persist_attempted: false,
            persisted: false,
            disconnected: false,
        }
    }

    pub fn append(&mut self, text: &str) {
        self.accumulated.push_str(text);
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
    }

    pub fn fail(&mut self) {
        self.status = SessionStatus::Failed;
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Claim the single store write; `false` if it was already claimed
    pub(crate) fn begin_persist(&mut self) -> bool {
        !std::mem::replace(&mut self.persist_attempted, true)
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.disconnected = true;
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}
