//! Streaming execution pipeline
//!
//! - `buffer` coalesces generator fragments into delta chunks
//! - `emitter` is the producer-facing half of the bridge
//! - `bridge` runs a producer as a task behind a blocking iterator
//! - `encoder` maps events to wire messages and persists the answer

pub mod bridge;
pub mod buffer;
pub mod emitter;
pub mod encoder;
pub mod session;

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

pub use bridge::{BridgeConfig, BridgeItem, StreamBridge};
pub use buffer::{buffered, TokenBuffer};
pub use emitter::{EventEmitter, EventProducer};
pub use encoder::{JsonLinesSink, SessionOutcome, TransportEncoder, WireMessage, WireSink};
pub use session::{SessionStatus, StreamSession};

use crate::store::ConversationStore;

/// Run one complete session: producer on `handle`, consumer on this thread
///
/// Blocks until the terminal event has been delivered and the answer
/// persisted. Call it from a plain thread (e.g. `spawn_blocking`), never
/// from inside an async task.
pub fn serve_session<P, S>(
    handle: &Handle,
    producer: Arc<P>,
    input: P::Input,
    config: BridgeConfig,
    session: StreamSession,
    sink: S,
    store: Arc<dyn ConversationStore>,
) -> SessionOutcome
where
    P: EventProducer,
    S: WireSink,
{
    info!(
        session_id = %session.id,
        conversation_id = %session.conversation_id,
        agent = producer.name(),
        "Stream session started"
    );
    let bridge = StreamBridge::spawn(handle, producer, input, config);
    let mut encoder = TransportEncoder::new(session, sink, store);
    let outcome = encoder.drain(bridge);
    info!(
        session_id = %outcome.session_id,
        status = ?outcome.status,
        persisted = outcome.persisted,
        disconnected = outcome.disconnected,
        "Stream session finished"
    );
    outcome
}
