//! Match Event fan-out, decoupled from any transport.
//!
//! Publishing reaches the snapshot of subscribers alive at send time; a
//! subscriber that unbinds (drops its [`Subscription`]) keeps every event it
//! already received and simply stops getting new ones. Zero subscribers is
//! not an error.
use crate::request::MatchEvent;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Topic name under which satisfaction events are published.
pub const TOPIC: &str = "requests satisfied";

/// Default buffered event capacity per subscriber.
const DEFAULT_CAPACITY: usize = 1024;

/// Publish side of the Match Event channel.
pub struct Emitter {
    sender: broadcast::Sender<MatchEvent>,
}

impl Emitter {
    /// New emitter with the default per-subscriber buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// New emitter buffering up to `capacity` undelivered events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Bind a new subscriber. It observes events published from this point on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            inner: self.sender.subscribe(),
        }
    }

    /// Publish one event to all current subscribers; returns how many received it.
    pub fn publish(&self, event: MatchEvent) -> usize {
        debug!(topic = TOPIC, request_id = %event.request_id, txid = %event.txid, "publish match event");
        // Err only means no live subscribers; events are fire-and-forget.
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive side handle; dropping it unbinds the subscriber.
pub struct Subscription {
    inner: broadcast::Receiver<MatchEvent>,
}

impl Subscription {
    /// Wait for the next event. `None` once the emitter is gone and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<MatchEvent> {
        loop {
            match self.inner.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll for an already-buffered event.
    pub fn try_recv(&mut self) -> Option<MatchEvent> {
        loop {
            match self.inner.try_recv() {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
