//! Transport encoder
//!
//! Maps bridge events one-to-one onto wire messages, accumulates delta text
//! and persists the answer once the terminal event has been seen. Delivery
//! and persistence are independent: a client that disconnects mid-stream
//! does not prevent the answer from being stored.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::error::{BridgeError, SinkError};
use crate::events::{Event, EventPayload, FinalStatus};
use crate::store::ConversationStore;

use super::bridge::BridgeItem;
use super::session::{SessionStatus, StreamSession};

/// One message on the wire: common envelope plus type-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub session_id: String,
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl WireMessage {
    pub fn from_event(session: &StreamSession, event: &Event) -> Self {
        Self {
            session_id: session.id.clone(),
            conversation_id: session.conversation_id.clone(),
            kind: event.kind().as_str().to_string(),
            timestamp: event.timestamp,
            payload: payload_for(event),
        }
    }
}

fn payload_for(event: &Event) -> Value {
    match &event.payload {
        EventPayload::Start => Value::Object(Map::new()),
        EventPayload::Thinking { thought, roadmap } => {
            let mut payload = json!({ "agent": event.agent, "thought": thought });
            if !roadmap.is_empty() {
                payload["roadmap"] = json!(roadmap);
            }
            payload
        }
        EventPayload::ToolStart {
            tool_name,
            description,
        } => {
            let mut payload = json!({ "tool_name": tool_name });
            if let Some(description) = description {
                payload["description"] = json!(description);
            }
            payload
        }
        EventPayload::ToolOutput {
            tool_name,
            status,
            output,
        } => {
            let mut payload = json!({ "tool_name": tool_name, "status": status });
            if let Some(output) = output {
                payload["output"] = output.clone();
            }
            payload
        }
        EventPayload::ToolEnd { tool_name, summary } => {
            let mut payload = json!({ "tool_name": tool_name });
            if let Some(summary) = summary {
                payload["summary"] = json!(summary);
            }
            payload
        }
        EventPayload::Delta { text } => json!({ "agent": event.agent, "text": text }),
        EventPayload::Result { success, data } => json!({ "success": success, "data": data }),
        EventPayload::Error {
            error_type,
            message,
        } => json!({ "error_type": error_type, "message": message, "agent": event.agent }),
        EventPayload::End { success } => json!({ "success": success }),
        EventPayload::Done { final_status } => json!({ "final_status": final_status }),
    }
}

/// Client-facing transport
pub trait WireSink: Send {
    fn send(&mut self, message: &WireMessage) -> Result<(), SinkError>;
}

/// Writes each message as one line of JSON
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> WireSink for JsonLinesSink<W> {
    fn send(&mut self, message: &WireMessage) -> Result<(), SinkError> {
        let line = serde_json::to_string(message)?;
        let written = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(SinkError::Disconnected),
            Err(e) => Err(SinkError::Io(e)),
        }
    }
}

/// Summary of a drained session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    /// The conversation store accepted the answer
    pub persisted: bool,
    /// Why the store rejected the answer, if it did
    pub persist_error: Option<String>,
    /// Client went away before the terminal message
    pub disconnected: bool,
    pub messages_delivered: usize,
    pub chars_accumulated: usize,
}

/// Consumer side of one stream session
pub struct TransportEncoder<S: WireSink> {
    session: StreamSession,
    sink: S,
    store: Arc<dyn ConversationStore>,
    delivered: usize,
    persist_error: Option<String>,
}

impl<S: WireSink> TransportEncoder<S> {
    pub fn new(session: StreamSession, sink: S, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            session,
            sink,
            store,
            delivered: 0,
            persist_error: None,
        }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Pull items until the terminal event (or a bridge failure)
    pub fn drain<I>(&mut self, items: I) -> SessionOutcome
    where
        I: IntoIterator<Item = BridgeItem>,
    {
        let mut terminated = false;
        for item in items {
            match item {
                Ok(event) => {
                    if self.handle_event(event) {
                        terminated = true;
                        break;
                    }
                }
                Err(err) => {
                    self.abort(err);
                    terminated = true;
                    break;
                }
            }
        }

        if !terminated {
            self.abort(BridgeError::Truncated);
        }
        self.outcome()
    }

    /// Returns true once the terminal event has been handled
    fn handle_event(&mut self, event: Event) -> bool {
        if let Some(text) = event.delta_text() {
            self.session.append(text);
        }
        let message = WireMessage::from_event(&self.session, &event);
        self.deliver(&message);

        match event.payload {
            EventPayload::End { success: true }
            | EventPayload::Done {
                final_status: FinalStatus::Success,
            } => {
                self.session.complete();
                self.persist(true);
                true
            }
            EventPayload::End { success: false } | EventPayload::Done { .. } => {
                self.session.fail();
                // Keep whatever the client already saw
                self.persist(false);
                true
            }
            _ => false,
        }
    }

    fn abort(&mut self, err: BridgeError) {
        error!(
            session_id = %self.session.id,
            "Stream aborted: {}", err
        );
        self.session.fail();

        let agent = constants::streaming::PIPELINE_AGENT;
        let failure = Event::error(agent, "BridgeError", err.to_string());
        let message = WireMessage::from_event(&self.session, &failure);
        self.deliver(&message);
        let done = Event::done(agent, FinalStatus::Error);
        let message = WireMessage::from_event(&self.session, &done);
        self.deliver(&message);
    }

    fn deliver(&mut self, message: &WireMessage) {
        if self.session.is_disconnected() {
            return;
        }
        match self.sink.send(message) {
            Ok(()) => self.delivered += 1,
            Err(e) => {
                warn!(
                    session_id = %self.session.id,
                    "Client delivery failed, continuing without it: {}", e
                );
                self.session.mark_disconnected();
            }
        }
    }

    /// Hand the answer to the store at most once
    ///
    /// A successful session stores its full text even when empty; a failed
    /// one stores only non-empty partial text.
    fn persist(&mut self, completed: bool) {
        if !completed && self.session.accumulated().is_empty() {
            debug!(session_id = %self.session.id, "Nothing to persist");
            return;
        }
        if !self.session.begin_persist() {
            return;
        }

        let result = self.store.append_answer(
            &self.session.conversation_id,
            &self.session.message_id,
            self.session.accumulated(),
        );
        match result {
            Ok(()) => {
                self.session.mark_persisted();
                info!(
                    session_id = %self.session.id,
                    chars = self.session.accumulated().chars().count(),
                    elapsed_ms = self.session.elapsed_ms(),
                    "Answer persisted"
                );
            }
            Err(e) => {
                error!(
                    session_id = %self.session.id,
                    "Failed to persist answer: {}", e
                );
                self.persist_error = Some(e.to_string());
            }
        }
    }

    fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            session_id: self.session.id.clone(),
            status: self.session.status(),
            persisted: self.session.is_persisted(),
            persist_error: self.persist_error.clone(),
            disconnected: self.session.is_disconnected(),
            messages_delivered: self.delivered,
            chars_accumulated: self.session.accumulated().chars().count(),
        }
    }
}
