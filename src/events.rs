//! Event fan-out shared by the socket and transport layers.
//!
//! Observers get a bounded broadcast receiver and may lag. Queue subscribers
//! get an unbounded channel that sees every event in emission order.

use std::sync::{Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};

/// Fan-out of one event stream to lossy observers and lossless queues.
#[derive(Debug)]
pub struct EventHub<T> {
    observers: broadcast::Sender<T>,
    queues: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> EventHub<T> {
    /// Create a hub whose observers buffer at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (observers, _) = broadcast::channel(capacity);
        Self {
            observers,
            queues: Mutex::new(Vec::new()),
        }
    }

    /// Bounded receiver; events are dropped for a receiver that falls behind.
    #[must_use]
    pub fn observe(&self) -> broadcast::Receiver<T> {
        self.observers.subscribe()
    }

    /// Unbounded receiver of every later event.
    #[must_use]
    pub fn queue(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Publish `event`. Queues whose receiver was dropped are forgotten.
    pub fn emit(&self, event: T) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
        // No observers is not an error.
        let _ = self.observers.send(event);
    }
}
