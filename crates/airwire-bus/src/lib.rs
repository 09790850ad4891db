pub mod topic;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

pub use topic::TopicError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Set when the message is a retained replay delivered on subscribe.
    pub retained: bool,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,
    #[error("cannot publish to topic {0:?}")]
    InvalidTopic(String),
    #[error(transparent)]
    Filter(#[from] TopicError),
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Publish/subscribe primitives of an already-connected transport.
pub trait Bus: Send + Sync {
    /// Subscribes to a filter. Retained messages matching the filter are
    /// delivered first.
    fn subscribe(&self, filter: &str) -> BusResult<broadcast::Receiver<BusMessage>>;
    fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> BusResult<()>;
    /// Last retained message for an exact topic, if the transport holds one.
    fn retained(&self, topic: &str) -> Option<BusMessage>;
    /// Every retained message whose topic matches `filter`, sorted by topic.
    /// Transports without a local retained store return nothing.
    fn retained_matching(&self, _filter: &str) -> Vec<BusMessage> {
        Vec::new()
    }
}

/// Simple in-memory bus with broker-style retained messages, for tests and
/// single-process wiring.
#[derive(Debug, Default)]
pub struct LocalBus {
    subscriptions: parking_lot::RwLock<Vec<(String, broadcast::Sender<BusMessage>)>>,
    retained: parking_lot::RwLock<HashMap<String, BusMessage>>,
    closed: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retained_len(&self) -> usize {
        self.retained.read().len()
    }

    /// Disconnects every subscriber and refuses further traffic. Receivers
    /// see the channel close once they have drained what was already sent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscriptions.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        Ok(())
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, filter: &str) -> BusResult<broadcast::Receiver<BusMessage>> {
        self.ensure_open()?;
        topic::validate_filter(filter)?;
        // Held until the subscription is live so no retained update slips
        // between the replay and the first live delivery.
        let retained = self.retained.read();
        let replay: Vec<&BusMessage> = retained
            .values()
            .filter(|msg| topic::matches(filter, &msg.topic))
            .collect();
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY + replay.len());
        for msg in replay {
            let _ = tx.send(BusMessage {
                retained: true,
                ..msg.clone()
            });
        }
        self.subscriptions.write().push((filter.to_string(), tx));
        drop(retained);
        Ok(rx)
    }

    fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> BusResult<()> {
        self.ensure_open()?;
        if !topic::is_publishable(topic) {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
        let msg = BusMessage {
            topic: topic.to_string(),
            payload,
            retained: false,
        };
        if retain {
            let mut guard = self.retained.write();
            // An empty retained payload clears the topic, as on a broker.
            if msg.payload.is_empty() {
                guard.remove(topic);
            } else {
                guard.insert(topic.to_string(), msg.clone());
            }
        }

        let mut guard = self.subscriptions.write();
        guard.retain(|(_, sender)| sender.receiver_count() > 0);
        for (filter, sender) in guard.iter() {
            if topic::matches(filter, topic) {
                let _ = sender.send(msg.clone());
            }
        }
        Ok(())
    }

    fn retained(&self, topic: &str) -> Option<BusMessage> {
        self.retained.read().get(topic).cloned()
    }

    fn retained_matching(&self, filter: &str) -> Vec<BusMessage> {
        let mut found: Vec<BusMessage> = self
            .retained
            .read()
            .values()
            .filter(|msg| topic::matches(filter, &msg.topic))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.topic.cmp(&b.topic));
        found
    }
}
