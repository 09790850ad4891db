use std::collections::HashSet;
use std::sync::Arc;

use airwire_bus::Bus;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MirrorError, MirrorResult};

/// A publish request handed off the UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

/// Cloneable handle that queues publishes for the publisher task. Queuing
/// never blocks, so it is safe to call from the UI thread.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbox {
    pub fn channel() -> (Outbox, OutboxReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx }, OutboxReceiver { rx })
    }

    pub fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> MirrorResult<()> {
        self.tx
            .send(OutboundMessage {
                topic: topic.to_string(),
                payload,
                retain,
            })
            .map_err(|_| MirrorError::OutboxClosed)
    }
}

pub struct OutboxReceiver {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl OutboxReceiver {
    /// Takes everything queued so far without waiting.
    pub fn drain_pending(&mut self) -> Vec<OutboundMessage> {
        let mut batch = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            batch.push(msg);
        }
        batch
    }

    /// Publishes queued messages on the bus, coalescing each burst.
    pub fn spawn(mut self, bus: Arc<dyn Bus>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(first) = self.rx.recv().await {
                let mut batch = vec![first];
                batch.extend(self.drain_pending());
                for msg in coalesce(batch) {
                    match bus.publish(&msg.topic, msg.payload, msg.retain) {
                        Ok(()) => debug!(
                            target = "outbox",
                            topic = %msg.topic,
                            retain = msg.retain,
                            "published"
                        ),
                        Err(err) => warn!(
                            target = "outbox",
                            topic = %msg.topic,
                            error = %err,
                            "failed to publish"
                        ),
                    }
                }
            }
        })
    }
}

/// Keeps only the newest retained message per topic. Non-retained messages
/// are commands or events and are all kept. Relative order of survivors is
/// preserved.
pub fn coalesce(batch: Vec<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut seen = HashSet::new();
    let mut kept: Vec<OutboundMessage> = batch
        .into_iter()
        .rev()
        .filter(|msg| !msg.retain || seen.insert(msg.topic.clone()))
        .collect();
    kept.reverse();
    kept
}
