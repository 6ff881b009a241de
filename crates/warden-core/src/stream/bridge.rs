//! Cooperative-to-blocking stream bridge
//!
//! Runs an [`EventProducer`] as a task on a tokio runtime and hands its events
//! to a consumer that pulls one item at a time, either blocking (`Iterator`)
//! or async (`next_async`). The two sides share only a bounded channel and a
//! cancellation token.
//!
//! Dropping the bridge, or calling [`StreamBridge::cancel`], cancels the
//! producer. A producer that ignores the token is aborted once the grace
//! period runs out.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::error::{BridgeError, ProducerError};
use crate::events::{Event, FinalStatus};

use super::emitter::{EventEmitter, EventProducer};

/// One item pulled from the bridge
pub type BridgeItem = Result<Event, BridgeError>;

/// Tunables for one bridge instance
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bounded queue size between producer and consumer
    pub channel_capacity: usize,
    /// How long a cancelled producer may keep running before it is aborted
    pub cancel_grace: Duration,
    /// Optional upper bound on the whole session
    pub session_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: constants::streaming::CHANNEL_CAPACITY,
            cancel_grace: constants::streaming::CANCEL_GRACE,
            session_timeout: None,
        }
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Pull-based view over a running producer
pub struct StreamBridge {
    rx: mpsc::Receiver<BridgeItem>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    handle: Handle,
    grace: Duration,
    /// Terminal event, bridge error or end of channel seen
    finished: bool,
}

impl StreamBridge {
    /// Start `producer` on `handle` and return the consumer side
    pub fn spawn<P: EventProducer>(
        handle: &Handle,
        producer: Arc<P>,
        input: P::Input,
        config: BridgeConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new(tx, cancel.clone(), producer.name());

        let task = handle.spawn(drive(producer, input, emitter, config.clone()));

        Self {
            rx,
            cancel,
            task: Some(task),
            handle: handle.clone(),
            grace: config.cancel_grace,
            finished: false,
        }
    }

    /// Await the next item from async code
    pub async fn next_async(&mut self) -> Option<BridgeItem> {
        if self.finished {
            return None;
        }
        let item = self.rx.recv().await;
        self.observe(&item);
        item
    }

    /// Whether the sequence has ended (normally or not)
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Abandon the session: stop the producer and release its resources
    pub fn cancel(&mut self) {
        self.finished = true;
        self.cancel.cancel();
        self.rx.close();

        let Some(task) = self.task.take() else {
            return;
        };
        if task.is_finished() {
            return;
        }

        debug!("Cancelling stream producer");
        let grace = self.grace;
        let abort = task.abort_handle();
        self.handle.spawn(async move {
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!("Stream producer ignored cancellation for {:?}, aborting", grace);
                abort.abort();
            }
        });
    }

    fn observe(&mut self, item: &Option<BridgeItem>) {
        match item {
            Some(Ok(event)) if event.is_terminal() => self.finished = true,
            Some(Ok(_)) => {}
            Some(Err(_)) | None => self.finished = true,
        }
    }
}

impl Iterator for StreamBridge {
    type Item = BridgeItem;

    /// Block until the next item is available
    ///
    /// Must not be called from within an async execution context.
    fn next(&mut self) -> Option<BridgeItem> {
        if self.finished {
            return None;
        }
        let item = self.rx.blocking_recv();
        self.observe(&item);
        item
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}

/// Body of the bridge task: bookkeeping events around the producer task
async fn drive<P: EventProducer>(
    producer: Arc<P>,
    input: P::Input,
    emitter: EventEmitter,
    config: BridgeConfig,
) {
    let agent = producer.name().to_string();
    if emitter.emit_bookkeeping(Event::start(&agent)).await.is_err() {
        debug!(agent = %agent, "Consumer gone before start");
        return;
    }

    let producer_cancel = emitter.cancellation().child_token();
    let producer_emitter = emitter.with_cancel(producer_cancel.clone());
    let mut inner = tokio::spawn(async move { producer.produce(input, &producer_emitter).await });
    let _guard = AbortOnDrop(inner.abort_handle());

    let joined = match config.session_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut inner).await {
            Ok(joined) => Some(joined),
            Err(_) => None,
        },
        None => Some((&mut inner).await),
    };

    match joined {
        Some(Ok(Ok(()))) => {
            let terminal = if emitter.has_errored() {
                Event::done(&agent, FinalStatus::Error)
            } else {
                Event::end(&agent, true)
            };
            let _ = emitter.emit_bookkeeping(terminal).await;
        }
        Some(Ok(Err(_gone))) => {
            debug!(agent = %agent, "Producer stopped, consumer gone");
        }
        Some(Err(join_err)) => {
            let err = bridge_error(join_err);
            error!(agent = %agent, "Stream producer failed: {}", err);
            let _ = emitter.send(Err(err)).await;
        }
        None => {
            let limit = config.session_timeout.unwrap_or_default();
            info!(agent = %agent, "Session timed out after {:?}", limit);
            producer_cancel.cancel();
            if tokio::time::timeout(config.cancel_grace, &mut inner)
                .await
                .is_err()
            {
                inner.abort();
            }
            if !emitter.has_errored() {
                let err = ProducerError::Timeout(limit);
                let event = Event::error(&agent, err.error_type(), err.to_string());
                if emitter.emit_bookkeeping(event).await.is_err() {
                    return;
                }
            }
            let _ = emitter
                .emit_bookkeeping(Event::done(&agent, FinalStatus::Error))
                .await;
        }
    }
}

fn bridge_error(err: JoinError) -> BridgeError {
    if err.is_panic() {
        BridgeError::ProducerPanicked(panic_message(err.into_panic()))
    } else {
        BridgeError::ProducerAborted
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
