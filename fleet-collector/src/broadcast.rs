//! Live fan-out of ingested samples.
//!
//! Built on `tokio::sync::broadcast`: publishing never waits on observers.
//! Each subscriber reads from its own cursor over a bounded ring; when a
//! subscriber falls more than `buffer` events behind, its oldest unread
//! events are dropped and it resumes at the oldest one still retained.
//!
//! ```ignore
//! let broadcaster = Broadcaster::new(256);
//! let mut sub = broadcaster.subscribe();
//! broadcaster.publish("web-01", sample);
//! while let Some(event) = sub.recv().await {
//!     println!("{} -> {:?}", event.host_id, event.sample);
//! }
//! ```

use crate::sample::Sample;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;
use uuid::Uuid;

/// Default number of undelivered events kept per subscriber.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// One delivered update: `(host_id, sample)`.
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub host_id: String,
    pub sample: Arc<Sample>,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<LiveEvent>,
    buffer: usize,
}

impl Broadcaster {
    /// `buffer` is rounded up to a power of two by the underlying channel.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).next_power_of_two();
        let (sender, _) = broadcast::channel(buffer);
        Self { sender, buffer }
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    pub fn subscribe(&self) -> Subscription {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            receiver: Some(self.sender.subscribe()),
            dropped: 0,
        };
        debug!(subscription = %subscription.id, "observer subscribed");
        subscription
    }

    /// Delivers the event to every current subscriber and returns how many
    /// were reached. Never blocks and never fails.
    pub fn publish(&self, host_id: &str, sample: Arc<Sample>) -> usize {
        let event = LiveEvent {
            host_id: host_id.to_string(),
            sample,
        };
        // Err only means nobody is listening right now
        self.sender.send(event).unwrap_or(0)
    }

    /// Stops delivery to `subscription`. Calling it again is a no-op.
    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.close();
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// Handle of one observer. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    receiver: Option<broadcast::Receiver<LiveEvent>>,
    dropped: u64,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Events lost to overflow since subscribing.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    pub fn close(&mut self) {
        if self.receiver.take().is_some() {
            debug!(subscription = %self.id, dropped = self.dropped, "observer unsubscribed");
        }
    }

    /// Next event, waiting if none is pending. `None` once closed.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    self.dropped += missed;
                    debug!(subscription = %self.id, missed, "slow observer, oldest events dropped");
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Next pending event without waiting.
    pub fn try_recv(&mut self) -> Option<LiveEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => self.dropped += missed,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Lazy, unbounded stream of events; ends when the broadcaster is gone.
    pub fn into_stream(self) -> impl Stream<Item = LiveEvent> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}
