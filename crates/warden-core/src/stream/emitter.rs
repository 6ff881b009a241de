//! Producer side of the stream bridge
//!
//! An [`EventProducer`] runs inside its own task and pushes events through an
//! [`EventEmitter`]. Emission suspends while the bounded queue is full, so a
//! slow consumer throttles the producer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ConsumerGone, ProducerError};
use crate::events::{Event, EventKind};

use super::bridge::BridgeItem;

/// Something that turns one input into an ordered event sequence
///
/// `produce` must not emit `start`, `end` or `done`; the bridge owns those.
/// Returning `Err(ConsumerGone)` means emission failed and the producer
/// stopped early.
#[async_trait]
pub trait EventProducer: Send + Sync + 'static {
    type Input: Send + 'static;

    /// Agent name stamped on bridge-generated events
    fn name(&self) -> &str;

    async fn produce(&self, input: Self::Input, emitter: &EventEmitter) -> Result<(), ConsumerGone>;
}

/// Handle used by a producer to push events to the consumer
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<BridgeItem>,
    cancel: CancellationToken,
    agent: Arc<str>,
    /// Set once an `error` event went out; later non-terminal events are dropped
    errored: Arc<AtomicBool>,
}

impl EventEmitter {
    pub(crate) fn new(tx: mpsc::Sender<BridgeItem>, cancel: CancellationToken, agent: &str) -> Self {
        Self {
            tx,
            cancel,
            agent: Arc::from(agent),
            errored: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Same queue and error state, different cancellation scope
    pub(crate) fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel,
            agent: self.agent.clone(),
            errored: self.errored.clone(),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Token that fires when the session is cancelled
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether an `error` event has been emitted in this session
    pub fn has_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Push one event, waiting for queue capacity
    pub async fn emit(&self, event: Event) -> Result<(), ConsumerGone> {
        if event.is_terminal() {
            warn!(
                agent = %self.agent,
                "Dropping {} event from producer; terminal events belong to the bridge",
                event.kind()
            );
            return Ok(());
        }
        if self.has_errored() {
            debug!(agent = %self.agent, "Dropping {} event after error", event.kind());
            return Ok(());
        }
        if event.kind() == EventKind::Error {
            self.errored.store(true, Ordering::Release);
        }
        self.send(Ok(event)).await
    }

    /// Emit the single `error` event describing a producer failure
    pub async fn fail(&self, err: &ProducerError) -> Result<(), ConsumerGone> {
        self.emit(Event::error(
            self.agent.as_ref(),
            err.error_type(),
            err.to_string(),
        ))
        .await
    }

    /// Emit bridge bookkeeping (`start`, `end`, `done`, timeout error)
    pub(crate) async fn emit_bookkeeping(&self, event: Event) -> Result<(), ConsumerGone> {
        if event.kind() == EventKind::Error {
            self.errored.store(true, Ordering::Release);
        }
        self.send(Ok(event)).await
    }

    pub(crate) async fn send(&self, item: BridgeItem) -> Result<(), ConsumerGone> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConsumerGone),
            sent = self.tx.send(item) => sent.map_err(|_| ConsumerGone),
        }
    }
}
