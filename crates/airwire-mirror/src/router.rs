use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use airwire_bus::topic::{self, TopicError};
use parking_lot::RwLock;
use tracing::{debug, warn};

pub type Callback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Identity of one registered callback, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Route {
    id: SubscriptionId,
    filter: String,
    callback: Callback,
}

/// Fans inbound bus messages out to every callback whose filter matches.
#[derive(Clone, Default)]
pub struct SubscriberRouter {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    routes: RwLock<Vec<Route>>,
    next_id: AtomicU64,
}

impl SubscriberRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback. Identical or overlapping filters are allowed;
    /// callbacks run in registration order.
    pub fn subscribe<F>(&self, filter: &str, callback: F) -> Result<SubscriptionId, TopicError>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        topic::validate_filter(filter)?;
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.routes.write().push(Route {
            id,
            filter: filter.to_string(),
            callback: Arc::new(callback),
        });
        debug!(target = "router", filter, ?id, "subscribed");
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut routes = self.inner.routes.write();
        let before = routes.len();
        routes.retain(|route| route.id != id);
        before != routes.len()
    }

    /// Invokes every matching callback and returns how many ran. A panicking
    /// callback is logged and does not stop the others.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let matched: Vec<Callback> = self
            .inner
            .routes
            .read()
            .iter()
            .filter(|route| topic::matches(&route.filter, topic))
            .map(|route| Arc::clone(&route.callback))
            .collect();

        for callback in &matched {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(topic, payload)));
            if outcome.is_err() {
                warn!(target = "router", topic, "subscriber callback panicked");
            }
        }
        matched.len()
    }

    /// Distinct filters, for (re)subscribing a transport after connect.
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = Vec::new();
        for route in self.inner.routes.read().iter() {
            if !filters.contains(&route.filter) {
                filters.push(route.filter.clone());
            }
        }
        filters
    }

    pub fn len(&self) -> usize {
        self.inner.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
