use std::sync::Arc;

use airwire_bus::{Bus, BusMessage};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::StateCache;
use crate::error::MirrorResult;
use crate::router::SubscriberRouter;

/// Records one inbound message in the state cache and routes it. Returns the
/// number of callbacks that ran.
pub fn ingest_message(msg: &BusMessage, cache: &StateCache, router: &SubscriberRouter) -> usize {
    let changed = cache.record(&msg.topic, msg.payload.clone());
    let delivered = router.dispatch(&msg.topic, &msg.payload);
    debug!(
        target = "bus.ingest",
        topic = %msg.topic,
        retained = msg.retained,
        changed,
        delivered,
        "ingested bus message"
    );
    delivered
}

/// Subscribes to `filter` on the bus and feeds every message through
/// [`ingest_message`] on a dedicated task.
pub fn start_bus_ingest(
    bus: Arc<dyn Bus>,
    filter: &str,
    cache: Arc<StateCache>,
    router: SubscriberRouter,
) -> MirrorResult<JoinHandle<()>> {
    let mut rx = bus.subscribe(filter)?;
    let filter = filter.to_string();
    Ok(tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    ingest_message(&msg, &cache, &router);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "bus.ingest", filter = %filter, skipped, "bus ingest lagged");
                }
                Err(RecvError::Closed) => {
                    debug!(target = "bus.ingest", filter = %filter, "bus closed; ingest stopping");
                    break;
                }
            }
        }
    }))
}
