//! Semantic events emitted during one streamed agent execution
//!
//! A session's sequence always opens with `start` and closes with exactly
//! one terminal event: `end` on success, or `error` followed by `done`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome reported by a `tool_output` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutputStatus {
    Success,
    Error,
}

/// Final status carried by `done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Success,
    Error,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Success => "success",
            FinalStatus::Error => "error",
        }
    }
}

/// Variant-specific event data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Start,
    Thinking {
        thought: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        roadmap: Vec<String>,
    },
    ToolStart {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    ToolOutput {
        tool_name: String,
        status: ToolOutputStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    ToolEnd {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Delta {
        text: String,
    },
    Result {
        success: bool,
        data: Map<String, Value>,
    },
    Error {
        error_type: String,
        message: String,
    },
    End {
        success: bool,
    },
    Done {
        final_status: FinalStatus,
    },
}

/// Discriminant of [`EventPayload`], used for matching and wire `type` tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Thinking,
    ToolStart,
    ToolOutput,
    ToolEnd,
    Delta,
    Result,
    Error,
    End,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Thinking => "thinking",
            EventKind::ToolStart => "tool_start",
            EventKind::ToolOutput => "tool_output",
            EventKind::ToolEnd => "tool_end",
            EventKind::Delta => "delta",
            EventKind::Result => "result",
            EventKind::Error => "error",
            EventKind::End => "end",
            EventKind::Done => "done",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete unit of a streamed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Producer identifier (agent name)
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(agent: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            agent: agent.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn start(agent: impl Into<String>) -> Self {
        Self::new(agent, EventPayload::Start)
    }

    pub fn thinking(agent: impl Into<String>, thought: impl Into<String>, roadmap: Vec<String>) -> Self {
        Self::new(
            agent,
            EventPayload::Thinking {
                thought: thought.into(),
                roadmap,
            },
        )
    }

    pub fn tool_start(
        agent: impl Into<String>,
        tool_name: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self::new(
            agent,
            EventPayload::ToolStart {
                tool_name: tool_name.into(),
                description,
            },
        )
    }

    pub fn tool_output(
        agent: impl Into<String>,
        tool_name: impl Into<String>,
        status: ToolOutputStatus,
        output: Option<Value>,
    ) -> Self {
        Self::new(
            agent,
            EventPayload::ToolOutput {
                tool_name: tool_name.into(),
                status,
                output,
            },
        )
    }

    pub fn tool_end(agent: impl Into<String>, tool_name: impl Into<String>, summary: Option<String>) -> Self {
        Self::new(
            agent,
            EventPayload::ToolEnd {
                tool_name: tool_name.into(),
                summary,
            },
        )
    }

    pub fn delta(agent: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(agent, EventPayload::Delta { text: text.into() })
    }

    pub fn result(agent: impl Into<String>, success: bool, data: Map<String, Value>) -> Self {
        Self::new(agent, EventPayload::Result { success, data })
    }

    pub fn error(agent: impl Into<String>, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            agent,
            EventPayload::Error {
                error_type: error_type.into(),
                message: message.into(),
            },
        )
    }

    pub fn end(agent: impl Into<String>, success: bool) -> Self {
        Self::new(agent, EventPayload::End { success })
    }

    pub fn done(agent: impl Into<String>, final_status: FinalStatus) -> Self {
        Self::new(agent, EventPayload::Done { final_status })
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Start => EventKind::Start,
            EventPayload::Thinking { .. } => EventKind::Thinking,
            EventPayload::ToolStart { .. } => EventKind::ToolStart,
            EventPayload::ToolOutput { .. } => EventKind::ToolOutput,
            EventPayload::ToolEnd { .. } => EventKind::ToolEnd,
            EventPayload::Delta { .. } => EventKind::Delta,
            EventPayload::Result { .. } => EventKind::Result,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::End { .. } => EventKind::End,
            EventPayload::Done { .. } => EventKind::Done,
        }
    }

    /// `end` and `done` close a session
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind(), EventKind::End | EventKind::Done)
    }

    /// Text of a `delta` event
    pub fn delta_text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Delta { text } => Some(text),
            _ => None,
        }
    }
}
