//! Test fakes shared across modules

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::{GenerationError, SinkError, ToolError};
use crate::generation::{FragmentStream, TextGenerator};
use crate::stream::{WireMessage, WireSink};
use crate::tools::{ConnectionConfig, ToolConnector, ToolSession};

// =============================================================================
// Generation
// =============================================================================

/// Yields a fixed list of fragments, optionally failing partway
pub(crate) struct ScriptedGenerator {
    fragments: Vec<String>,
    delay: Duration,
    fail_after: Option<usize>,
    pulled: Arc<AtomicUsize>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub(crate) fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            delay: Duration::ZERO,
            fail_after: None,
            pulled: Arc::new(AtomicUsize::new(0)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before every fragment
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail with a stream error after `n` fragments
    pub(crate) fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Fragments handed out so far
    pub(crate) fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        if self.fail_after == Some(0) {
            return Err(GenerationError::Status {
                status: 503,
                message: "backend unavailable".into(),
                retry_after: None,
            });
        }

        let fragments = self.fragments.clone();
        let delay = self.delay;
        let fail_after = self.fail_after;
        let pulled = self.pulled.clone();

        let stream = stream::unfold(0usize, move |index| {
            let fragments = fragments.clone();
            let pulled = pulled.clone();
            async move {
                if fail_after == Some(index) {
                    return Some((
                        Err(GenerationError::Stream("connection reset".into())),
                        usize::MAX,
                    ));
                }
                let fragment = fragments.get(index)?.clone();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                Some((Ok(fragment), index + 1))
            }
        });
        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Tools
// =============================================================================

/// How a fake connection behaves
#[derive(Debug, Clone, Copy)]
pub(crate) enum FakeBehavior {
    Healthy,
    /// Connect never completes
    Hang,
    /// Connect fails immediately
    Refuse,
    /// Connect completes after a delay
    Slow(Duration),
    /// Tool calls report `isError: true`
    ToolFails,
    /// Tool calls never complete; closing works
    CallHangs,
    /// Tool calls and closing never complete
    Stalled,
}

/// In-memory connector keyed by connection name
pub(crate) struct FakeConnector {
    behaviors: Mutex<HashMap<String, FakeBehavior>>,
    connects: AtomicUsize,
    calls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    created: Instant,
    finished: Mutex<HashMap<String, Duration>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            connects: AtomicUsize::new(0),
            calls: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            created: Instant::now(),
            finished: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn set(&self, name: &str, behavior: FakeBehavior) {
        self.behaviors.lock().insert(name.to_string(), behavior);
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sessions whose `close` was entered
    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Time from construction until each connection's connect finished
    pub(crate) fn finished_at(&self) -> HashMap<String, Duration> {
        self.finished.lock().clone()
    }
}

#[async_trait]
impl ToolConnector for FakeConnector {
    async fn connect(
        &self,
        name: &str,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn ToolSession>, ToolError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .get(name)
            .copied()
            .unwrap_or(FakeBehavior::Healthy);

        match behavior {
            FakeBehavior::Hang => futures::future::pending::<()>().await,
            FakeBehavior::Refuse => {
                return Err(ToolError::Connect(format!("{}: connection refused", name)))
            }
            FakeBehavior::Slow(delay) => tokio::time::sleep(delay).await,
            FakeBehavior::Healthy
            | FakeBehavior::ToolFails
            | FakeBehavior::CallHangs
            | FakeBehavior::Stalled => {}
        }

        self.finished
            .lock()
            .insert(name.to_string(), self.created.elapsed());
        Ok(Box::new(FakeSession {
            behavior,
            calls: self.calls.clone(),
            closes: self.closes.clone(),
        }))
    }
}

struct FakeSession {
    behavior: FakeBehavior,
    calls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolSession for FakeSession {
    async fn ping(&mut self) -> Result<(), ToolError> {
        Ok(())
    }

    async fn list_tools(&mut self) -> Result<Vec<String>, ToolError> {
        Ok(vec!["scan_host".into(), "lookup_cve".into()])
    }

    async fn list_resources(&mut self) -> Result<Vec<String>, ToolError> {
        Ok(vec!["report://latest".into()])
    }

    async fn call_tool(&mut self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, FakeBehavior::CallHangs | FakeBehavior::Stalled) {
            futures::future::pending::<()>().await;
        }
        if matches!(self.behavior, FakeBehavior::ToolFails) {
            return Ok(json!({
                "content": [{"type": "text", "text": format!("{} crashed", tool)}],
                "isError": true
            }));
        }
        Ok(json!({
            "content": [{"type": "text", "text": format!("{} ok", tool)}],
            "structuredContent": {"arguments": arguments},
            "isError": false
        }))
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, FakeBehavior::Stalled) {
            futures::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Keeps every delivered message; can simulate a disconnect
pub(crate) struct RecordingSink {
    messages: Vec<WireMessage>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self {
            messages: Vec::new(),
            fail_after: None,
        }
    }

    /// Accept `n` messages, then report the client as gone
    pub(crate) fn failing_after(n: usize) -> Self {
        Self {
            messages: Vec::new(),
            fail_after: Some(n),
        }
    }

    pub(crate) fn messages(&self) -> &[WireMessage] {
        &self.messages
    }
}

impl WireSink for RecordingSink {
    fn send(&mut self, message: &WireMessage) -> Result<(), SinkError> {
        if self.fail_after.is_some_and(|n| self.messages.len() >= n) {
            return Err(SinkError::Disconnected);
        }
        self.messages.push(message.clone());
        Ok(())
    }
}
