//! Event bridge: bounded FIFO from the transport's producer contexts (send-completion,
//! receive) to the single session consumer. Producers never block; a full bridge drops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pong_core::Event;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Create a bridge holding at most `capacity` undelivered events. `capacity` must be non-zero.
pub fn event_bridge(capacity: usize) -> (EventProducer, EventConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventProducer {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventConsumer { rx },
    )
}

/// Producer handle. Cheap to clone; one per callback context.
#[derive(Clone)]
pub struct EventProducer {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventProducer {
    /// Enqueue without waiting. On a full bridge the event is dropped and logged.
    pub fn push(&self, event: Event) -> Result<(), PushError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(?event, dropped, "event queue full; dropping event");
                Err(PushError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(PushError::Closed),
        }
    }

    /// Events dropped so far across all clones of this producer.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("event queue full")]
    Full,
    #[error("event queue closed")]
    Closed,
}

/// Consumer end. Owned by the session task.
pub struct EventConsumer {
    rx: mpsc::Receiver<Event>,
}

impl EventConsumer {
    /// Wait for the next event. `None` once every producer is gone and the queue is empty.
    pub async fn pop(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
