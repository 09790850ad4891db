//! The widget state mirror: the registry that keeps locally owned widget
//! values and their bus topics consistent in both directions.
//!
//! Outbound, every local assignment to a registered [`ValueHolder`] is
//! published retained on the binding's topic. Inbound, the subscriber router
//! hands messages to [`WidgetStateMirror::apply_remote_update`] on the
//! transport's task; the decoded value is queued onto the UI owner and
//! applied with [`ValueHolder::set_remote`], so the resulting change
//! notification reaches [`WidgetStateMirror::broadcast_local_change`] with the
//! suppress flag raised and nothing is echoed back.
//!
//! Remote values are applied in arrival order. A remote value that was queued
//! before a newer local edit is dropped when its turn comes.
//!
//! Table widgets additionally follow their rows, which live one level below
//! the table topic as `<topic>/data/<key>`. Each row is merged into the
//! table's record under `<key>`; an empty row payload removes the key.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use airwire_bus::{topic, Bus};
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::StateCache;
use crate::config::MirrorConfig;
use crate::error::{MirrorError, MirrorResult};
use crate::outbox::Outbox;
use crate::payload::{Source, StatePayload};
use crate::router::{SubscriberRouter, SubscriptionId};
use crate::ui::UiHandle;
use crate::value::{ValueHolder, WidgetValue};
use crate::widget::{WidgetConfig, WidgetKind};

/// Association between one locally owned value and its bus topic.
#[derive(Debug)]
pub struct WidgetBinding {
    pub path: String,
    pub topic: String,
    pub config: WidgetConfig,
    holder: ValueHolder,
    subscription: SubscriptionId,
    rows: Option<SubscriptionId>,
}

impl WidgetBinding {
    pub fn holder(&self) -> &ValueHolder {
        &self.holder
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Value handed to the UI owner.
    Queued,
    /// No binding owns the topic.
    Unbound,
    /// Our own publish coming back from the bus.
    OwnEcho,
    /// Undecodable or uncoercible payload, logged and dropped.
    Rejected,
}

#[derive(Clone)]
pub struct WidgetStateMirror {
    inner: Arc<MirrorInner>,
}

struct MirrorInner {
    config: MirrorConfig,
    session_id: String,
    registry: RwLock<Registry>,
    bus: Arc<dyn Bus>,
    router: SubscriberRouter,
    cache: Arc<StateCache>,
    outbox: Outbox,
    ui: UiHandle,
}

#[derive(Default)]
struct Registry {
    bindings: HashMap<String, Arc<WidgetBinding>>,
    topics: HashMap<String, String>,
}

impl WidgetStateMirror {
    pub fn new(
        config: MirrorConfig,
        bus: Arc<dyn Bus>,
        router: SubscriberRouter,
        cache: Arc<StateCache>,
        outbox: Outbox,
        ui: UiHandle,
    ) -> Self {
        Self {
            inner: Arc::new(MirrorInner {
                config,
                session_id: Uuid::new_v4().to_string(),
                registry: RwLock::new(Registry::default()),
                bus,
                router,
                cache,
                outbox,
                ui,
            }),
        }
    }

    /// Identifier stamped into every publish as `GUID`.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.inner.config
    }

    /// Binds `path` to a topic derived from `namespace` and returns the holder
    /// the UI uses to read and assign the value.
    ///
    /// Registering an existing path replaces its binding.
    pub fn register(
        &self,
        path: &str,
        initial: impl Into<WidgetValue>,
        namespace: &str,
        config: WidgetConfig,
    ) -> MirrorResult<ValueHolder> {
        if path.trim().is_empty() {
            return Err(MirrorError::EmptyPath);
        }
        let topic = self.compose_topic(namespace, path);
        if !topic::is_publishable(&topic) {
            return Err(MirrorError::InvalidPath(path.to_string()));
        }

        let weak = Arc::downgrade(&self.inner);
        let subscription = {
            let path = path.to_string();
            let weak = weak.clone();
            self.inner
                .router
                .subscribe(&topic, move |_: &str, payload: &[u8]| {
                    if let Some(mirror) = upgrade(&weak) {
                        mirror.apply_to_path(&path, payload);
                    }
                })?
        };
        let rows = if config.kind == WidgetKind::Table {
            let path = path.to_string();
            let weak = weak.clone();
            let rows = self
                .inner
                .router
                .subscribe(&rows_filter(&topic), move |row: &str, payload: &[u8]| {
                    if let Some(mirror) = upgrade(&weak) {
                        mirror.apply_row_to_path(&path, row, payload);
                    }
                });
            match rows {
                Ok(id) => Some(id),
                Err(err) => {
                    self.inner.router.unsubscribe(subscription);
                    return Err(err.into());
                }
            }
        } else {
            None
        };
        let holder = ValueHolder::new(initial);
        holder.subscribe(local_change_listener(weak, path.to_string(), subscription));

        let binding = Arc::new(WidgetBinding {
            path: path.to_string(),
            topic: topic.clone(),
            config,
            holder: holder.clone(),
            subscription,
            rows,
        });

        let replaced = {
            let mut registry = self.inner.registry.write();
            let replaced = registry.bindings.insert(path.to_string(), binding);
            if let Some(old) = &replaced {
                if old.topic != topic {
                    registry.topics.remove(&old.topic);
                }
            }
            registry.topics.insert(topic.clone(), path.to_string());
            replaced
        };
        if let Some(old) = replaced {
            self.inner.router.unsubscribe(old.subscription);
            if let Some(rows) = old.rows {
                self.inner.router.unsubscribe(rows);
            }
            debug!(target = "mirror", path, "replaced existing binding");
        }
        debug!(target = "mirror", path, topic = %topic, "registered widget");
        Ok(holder)
    }

    /// Publishes the current value of `path` unless this change is the echo
    /// of a remote update. Returns whether a publish was queued.
    pub fn broadcast_local_change(&self, path: &str) -> MirrorResult<bool> {
        let binding = self.binding(path)?;
        self.broadcast_binding(&binding)
    }

    fn broadcast_binding(&self, binding: &WidgetBinding) -> MirrorResult<bool> {
        let path = binding.path.as_str();
        if binding.holder.take_suppressed() {
            debug!(target = "mirror", path, "remote echo suppressed");
            return Ok(false);
        }
        self.publish_binding(binding)?;
        Ok(true)
    }

    /// Entry point for inbound messages on a bound topic. Never fails; every
    /// problem is logged and scoped to this one message.
    pub fn apply_remote_update(&self, topic: &str, payload: &[u8]) -> RemoteOutcome {
        let binding = {
            let registry = self.inner.registry.read();
            registry
                .topics
                .get(topic)
                .and_then(|path| registry.bindings.get(path))
                .cloned()
        };
        match binding {
            Some(binding) => self.apply_to_binding(&binding, payload),
            None => RemoteOutcome::Unbound,
        }
    }

    /// Applies the last known value for `path` if one exists (returns
    /// `true`), otherwise announces the binding's current value (returns
    /// `false`).
    pub fn initialize(&self, path: &str) -> MirrorResult<bool> {
        let binding = self.binding(path)?;
        if binding.config.kind == WidgetKind::Table {
            return Ok(self.initialize_table(&binding));
        }

        let retained = self
            .inner
            .cache
            .get(&binding.topic)
            .map(|cached| cached.payload)
            .or_else(|| {
                self.inner
                    .bus
                    .retained(&binding.topic)
                    .map(|msg| msg.payload)
            });

        if let Some(payload) = retained {
            match StatePayload::decode(&payload) {
                Ok(state) => {
                    if self.queue_remote_value(&binding, &state.val) == RemoteOutcome::Queued {
                        debug!(target = "mirror", path, "initialized from retained state");
                        return Ok(true);
                    }
                }
                Err(err) => warn!(
                    target = "mirror",
                    path,
                    error = %err,
                    "retained state unreadable; announcing local value"
                ),
            }
        }

        debug!(target = "mirror", path, "no retained state; announcing local value");
        self.publish_binding(&binding)?;
        Ok(false)
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.inner.registry.read().bindings.contains_key(path)
    }

    pub fn topic_for(&self, path: &str) -> Option<String> {
        self.inner
            .registry
            .read()
            .bindings
            .get(path)
            .map(|binding| binding.topic.clone())
    }

    pub fn holder(&self, path: &str) -> Option<ValueHolder> {
        self.inner
            .registry
            .read()
            .bindings
            .get(path)
            .map(|binding| binding.holder.clone())
    }

    pub fn value(&self, path: &str) -> Option<WidgetValue> {
        self.holder(path).map(|holder| holder.get())
    }

    pub fn len(&self) -> usize {
        self.inner.registry.read().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn compose_topic(&self, namespace: &str, path: &str) -> String {
        let base = self.inner.config.base_topic.as_str();
        let namespace = namespace
            .strip_prefix(base)
            .filter(|rest| rest.is_empty() || rest.starts_with(topic::DELIMITER))
            .unwrap_or(namespace);
        topic::join([base, namespace, path])
    }

    fn binding(&self, path: &str) -> MirrorResult<Arc<WidgetBinding>> {
        self.inner
            .registry
            .read()
            .bindings
            .get(path)
            .cloned()
            .ok_or_else(|| MirrorError::NotRegistered(path.to_string()))
    }

    fn apply_to_path(&self, path: &str, payload: &[u8]) -> RemoteOutcome {
        match self.binding(path) {
            Ok(binding) => self.apply_to_binding(&binding, payload),
            Err(_) => RemoteOutcome::Unbound,
        }
    }

    fn apply_row_to_path(&self, path: &str, row: &str, payload: &[u8]) -> RemoteOutcome {
        match self.binding(path) {
            Ok(binding) => self.queue_table_row(&binding, row, payload),
            Err(_) => RemoteOutcome::Unbound,
        }
    }

    /// Queues the merge of one row topic into the table's record.
    fn queue_table_row(&self, binding: &WidgetBinding, row: &str, payload: &[u8]) -> RemoteOutcome {
        let Some(key) = row
            .rsplit(topic::DELIMITER)
            .next()
            .filter(|key| !key.is_empty())
        else {
            return RemoteOutcome::Rejected;
        };
        let key = key.to_string();
        let value = (!payload.is_empty()).then(|| row_value(payload));

        let holder = binding.holder.clone();
        let epoch = holder.local_epoch();
        let path = binding.path.clone();
        let posted = self.inner.ui.post(move || {
            if holder.local_epoch() != epoch {
                debug!(target = "mirror", path = %path, "table row superseded by local edit");
                return;
            }
            let mut record = match holder.get() {
                WidgetValue::Record(record) => record,
                _ => serde_json::Map::new(),
            };
            let changed = match value {
                Some(value) => record.insert(key, value.clone()) != Some(value),
                None => record.remove(&key).is_some(),
            };
            if changed {
                holder.set_remote(WidgetValue::Record(record));
            }
        });
        match posted {
            Ok(()) => RemoteOutcome::Queued,
            Err(err) => {
                warn!(target = "mirror", path = %binding.path, error = %err, "ui queue unavailable");
                RemoteOutcome::Rejected
            }
        }
    }

    fn apply_to_binding(&self, binding: &WidgetBinding, payload: &[u8]) -> RemoteOutcome {
        let state = match StatePayload::decode(payload) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    target = "mirror",
                    topic = %binding.topic,
                    error = %err,
                    "dropping malformed state payload"
                );
                return RemoteOutcome::Rejected;
            }
        };
        if state.session.as_deref() == Some(self.session_id()) {
            return RemoteOutcome::OwnEcho;
        }
        self.queue_remote_value(binding, &state.val)
    }

    /// Coerces `value` for the binding and queues its assignment on the UI
    /// owner.
    fn queue_remote_value(&self, binding: &WidgetBinding, value: &WidgetValue) -> RemoteOutcome {
        let value = match binding.config.coerce(value) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    target = "mirror",
                    path = %binding.path,
                    error = %err,
                    "dropping remote value"
                );
                return RemoteOutcome::Rejected;
            }
        };

        let holder = binding.holder.clone();
        let epoch = holder.local_epoch();
        let path = binding.path.clone();
        let posted = self.inner.ui.post(move || {
            if holder.local_epoch() != epoch {
                debug!(target = "mirror", path = %path, "remote value superseded by local edit");
                return;
            }
            if holder.get() == value {
                return;
            }
            holder.set_remote(value);
        });
        match posted {
            Ok(()) => RemoteOutcome::Queued,
            Err(err) => {
                warn!(target = "mirror", path = %binding.path, error = %err, "ui queue unavailable");
                RemoteOutcome::Rejected
            }
        }
    }

    /// Rows come from the cache, or from the transport's retained store when
    /// ingest has not caught up yet.
    fn initialize_table(&self, binding: &WidgetBinding) -> bool {
        let mut rows: Vec<(String, Bytes)> = self
            .inner
            .cache
            .children(&topic::join([binding.topic.as_str(), "data"]))
            .into_iter()
            .map(|(key, row)| (key, row.payload))
            .collect();
        if rows.is_empty() {
            rows = self
                .inner
                .bus
                .retained_matching(&rows_filter(&binding.topic))
                .into_iter()
                .filter_map(|msg| {
                    let key = msg.topic.rsplit(topic::DELIMITER).next()?.to_string();
                    Some((key, msg.payload))
                })
                .collect();
        }
        if rows.is_empty() {
            debug!(target = "mirror", path = %binding.path, "no retained table rows");
            return false;
        }
        let record = rows
            .into_iter()
            .filter(|(_, payload)| !payload.is_empty())
            .map(|(key, payload)| (key, row_value(&payload)))
            .collect();
        self.queue_remote_value(binding, &WidgetValue::Record(record)) == RemoteOutcome::Queued
    }

    fn publish_binding(&self, binding: &WidgetBinding) -> MirrorResult<()> {
        let payload = StatePayload::new(binding.holder.get(), Source::Gui, self.session_id());
        self.inner
            .outbox
            .publish(&binding.topic, payload.encode()?, true)
    }
}

fn rows_filter(table_topic: &str) -> String {
    topic::join([table_topic, "data", topic::SINGLE_LEVEL])
}

/// A row payload as JSON, or as text when it is not JSON.
fn row_value(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

fn upgrade(weak: &Weak<MirrorInner>) -> Option<WidgetStateMirror> {
    weak.upgrade().map(|inner| WidgetStateMirror { inner })
}

/// Forwards changes of one holder while its binding is the registered one
/// for `path`. Holders from replaced bindings go quiet.
fn local_change_listener(
    weak: Weak<MirrorInner>,
    path: String,
    subscription: SubscriptionId,
) -> impl Fn(&WidgetValue) + Send + Sync + 'static {
    move |_: &WidgetValue| {
        let Some(mirror) = upgrade(&weak) else {
            return;
        };
        let Ok(binding) = mirror.binding(&path) else {
            return;
        };
        if binding.subscription != subscription {
            return;
        }
        if let Err(err) = mirror.broadcast_binding(&binding) {
            warn!(target = "mirror", path = %path, error = %err, "failed to broadcast local change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{OutboundMessage, OutboxReceiver};
    use crate::ui::UiQueue;
    use airwire_bus::LocalBus;

    struct Harness {
        mirror: WidgetStateMirror,
        bus: Arc<LocalBus>,
        router: SubscriberRouter,
        cache: Arc<StateCache>,
        outbox: OutboxReceiver,
        ui: UiQueue,
    }

    fn harness() -> Harness {
        let bus = Arc::new(LocalBus::new());
        let router = SubscriberRouter::new();
        let cache = Arc::new(StateCache::new());
        let (outbox, receiver) = Outbox::channel();
        let (ui_handle, ui) = UiQueue::channel();
        let mirror = WidgetStateMirror::new(
            MirrorConfig::default(),
            bus.clone(),
            router.clone(),
            cache.clone(),
            outbox,
            ui_handle,
        );
        Harness {
            mirror,
            bus,
            router,
            cache,
            outbox: receiver,
            ui,
        }
    }

    fn remote(val: &str) -> Vec<u8> {
        format!(r#"{{"val":{val},"src":"gui","ts":1.0,"GUID":"peer"}}"#).into_bytes()
    }

    fn decoded(msg: &OutboundMessage) -> StatePayload {
        StatePayload::decode(&msg.payload).expect("state payload")
    }

    #[test]
    fn register_composes_topic_and_strips_redundant_base() {
        let h = harness();
        h.mirror
            .register("/span", 0.0, "OPEN-AIR/Bandwidth", WidgetConfig::default())
            .unwrap();
        assert_eq!(
            h.mirror.topic_for("/span").as_deref(),
            Some("OPEN-AIR/Bandwidth/span")
        );
        h.mirror
            .register("gain", 0.0, "OPEN-AIRWAVES", WidgetConfig::default())
            .unwrap();
        assert_eq!(
            h.mirror.topic_for("gain").as_deref(),
            Some("OPEN-AIR/OPEN-AIRWAVES/gain")
        );
        assert!(h.mirror.is_registered("gain"));
        assert!(!h.mirror.is_registered("missing"));
        assert_eq!(h.mirror.topic_for("missing"), None);
    }

    #[test]
    fn register_rejects_empty_and_wildcard_paths() {
        let h = harness();
        assert!(matches!(
            h.mirror.register("", 0.0, "ns", WidgetConfig::default()),
            Err(MirrorError::EmptyPath)
        ));
        assert!(matches!(
            h.mirror.register("a/+", 0.0, "ns", WidgetConfig::default()),
            Err(MirrorError::InvalidPath(_))
        ));
        assert!(h.mirror.is_empty());
    }

    #[test]
    fn re_register_replaces_binding_and_route() {
        let mut h = harness();
        let first = h
            .mirror
            .register("fader", 1.0, "ns", WidgetConfig::default())
            .unwrap();
        let second = h
            .mirror
            .register("fader", 2.0, "other", WidgetConfig::default())
            .unwrap();
        assert_eq!(h.mirror.len(), 1);
        assert_eq!(h.router.len(), 1);
        assert_eq!(h.mirror.topic_for("fader").as_deref(), Some("OPEN-AIR/other/fader"));
        assert_eq!(
            h.mirror.apply_remote_update("OPEN-AIR/ns/fader", &remote("5")),
            RemoteOutcome::Unbound
        );

        first.set(9.0);
        assert!(h.outbox.drain_pending().is_empty());
        second.set(3.0);
        let published = h.outbox.drain_pending();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "OPEN-AIR/other/fader");
    }

    #[test]
    fn local_change_publishes_retained_state() {
        let mut h = harness();
        let holder = h
            .mirror
            .register("fader", 0.0, "ns", WidgetConfig::default())
            .unwrap();
        holder.set(-6.5);

        let published = h.outbox.drain_pending();
        assert_eq!(published.len(), 1);
        assert!(published[0].retain);
        assert_eq!(published[0].topic, "OPEN-AIR/ns/fader");
        let state = decoded(&published[0]);
        assert_eq!(state.val, WidgetValue::Number(-6.5));
        assert_eq!(state.src, Source::Gui);
        assert_eq!(state.session.as_deref(), Some(h.mirror.session_id()));
        assert_eq!(h.mirror.value("fader"), Some(WidgetValue::Number(-6.5)));
    }

    #[test]
    fn remote_update_is_queued_then_applied_without_echo() {
        let mut h = harness();
        let holder = h
            .mirror
            .register("fader", 0.0, "ns", WidgetConfig::default())
            .unwrap();

        let outcome = h
            .mirror
            .apply_remote_update("OPEN-AIR/ns/fader", &remote("4"));
        assert_eq!(outcome, RemoteOutcome::Queued);
        assert_eq!(holder.get(), WidgetValue::Number(0.0));

        assert_eq!(h.ui.drain(), 1);
        assert_eq!(holder.get(), WidgetValue::Number(4.0));
        assert!(h.outbox.drain_pending().is_empty());
        assert!(!holder.is_suppressed());
    }

    #[test]
    fn malformed_payload_is_scoped_to_one_message() {
        let mut h = harness();
        h.mirror
            .register("a", 0.0, "ns", WidgetConfig::default())
            .unwrap();
        h.mirror
            .register("b", 0.0, "ns", WidgetConfig::default())
            .unwrap();

        assert_eq!(
            h.mirror.apply_remote_update("OPEN-AIR/ns/a", b"{not json"),
            RemoteOutcome::Rejected
        );
        assert_eq!(
            h.mirror.apply_remote_update("OPEN-AIR/ns/a", b"{\"ts\":2.0}"),
            RemoteOutcome::Rejected
        );
        assert_eq!(
            h.mirror.apply_remote_update("OPEN-AIR/ns/b", &remote("7")),
            RemoteOutcome::Queued
        );
        h.ui.drain();
        assert!(h.mirror.is_registered("a"));
        assert_eq!(h.mirror.value("b"), Some(WidgetValue::Number(7.0)));
    }

    #[test]
    fn own_publishes_coming_back_are_ignored() {
        let mut h = harness();
        h.mirror
            .register("a", 0.0, "ns", WidgetConfig::default())
            .unwrap();
        let echo = StatePayload::new(WidgetValue::Number(1.0), Source::Gui, h.mirror.session_id())
            .encode()
            .unwrap();
        assert_eq!(
            h.mirror.apply_remote_update("OPEN-AIR/ns/a", &echo),
            RemoteOutcome::OwnEcho
        );
        assert_eq!(h.ui.drain(), 0);
    }

    #[test]
    fn uncoercible_remote_value_is_dropped() {
        let mut h = harness();
        h.mirror
            .register("mute", false, "ns", WidgetConfig::new(WidgetKind::Toggle))
            .unwrap();
        assert_eq!(
            h.mirror
                .apply_remote_update("OPEN-AIR/ns/mute", &remote("\"maybe\"")),
            RemoteOutcome::Rejected
        );
        assert_eq!(
            h.mirror.apply_remote_update("OPEN-AIR/ns/mute", &remote("\"on\"")),
            RemoteOutcome::Queued
        );
        h.ui.drain();
        assert_eq!(h.mirror.value("mute"), Some(WidgetValue::Bool(true)));
    }

    #[test]
    fn queued_remote_value_loses_to_newer_local_edit() {
        let mut h = harness();
        let holder = h
            .mirror
            .register("fader", 0.0, "ns", WidgetConfig::default())
            .unwrap();
        h.mirror
            .apply_remote_update("OPEN-AIR/ns/fader", &remote("4"));
        holder.set(8.0);
        h.ui.drain();

        assert_eq!(holder.get(), WidgetValue::Number(8.0));
        let published = h.outbox.drain_pending();
        assert_eq!(published.len(), 1);
        assert_eq!(decoded(&published[0]).val, WidgetValue::Number(8.0));
    }

    #[test]
    fn consecutive_remote_values_apply_in_arrival_order() {
        let mut h = harness();
        let holder = h
            .mirror
            .register("fader", 0.0, "ns", WidgetConfig::default())
            .unwrap();
        h.mirror
            .apply_remote_update("OPEN-AIR/ns/fader", &remote("5"));
        h.mirror
            .apply_remote_update("OPEN-AIR/ns/fader", &remote("0"));
        assert_eq!(h.ui.drain(), 2);
        assert_eq!(holder.get(), WidgetValue::Number(0.0));
        assert!(h.outbox.drain_pending().is_empty());
    }

    #[test]
    fn router_delivers_bound_topics() {
        let mut h = harness();
        h.mirror
            .register("fader", 0.0, "ns", WidgetConfig::default())
            .unwrap();
        assert_eq!(h.router.dispatch("OPEN-AIR/ns/fader", &remote("2")), 1);
        assert_eq!(h.router.dispatch("OPEN-AIR/ns/unbound", &remote("2")), 0);
        h.ui.drain();
        assert_eq!(h.mirror.value("fader"), Some(WidgetValue::Number(2.0)));
    }

    #[test]
    fn initialize_prefers_cached_state() {
        let mut h = harness();
        h.cache
            .record("OPEN-AIR/ns/fader", Bytes::from(remote("3")));
        h.mirror
            .register("fader", 0.0, "ns", WidgetConfig::default())
            .unwrap();

        assert!(h.mirror.initialize("fader").unwrap());
        h.ui.drain();
        assert_eq!(h.mirror.value("fader"), Some(WidgetValue::Number(3.0)));
        assert!(h.outbox.drain_pending().is_empty());
    }

    #[test]
    fn initialize_falls_back_to_transport_retained_store() {
        let mut h = harness();
        h.bus
            .publish("OPEN-AIR/ns/fader", Bytes::from(remote("11")), true)
            .unwrap();
        h.mirror
            .register("fader", 0.0, "ns", WidgetConfig::default())
            .unwrap();
        assert!(h.mirror.initialize("fader").unwrap());
        h.ui.drain();
        assert_eq!(h.mirror.value("fader"), Some(WidgetValue::Number(11.0)));
        assert!(h.outbox.drain_pending().is_empty());
    }

    #[test]
    fn initialize_without_retained_state_announces_value() {
        let mut h = harness();
        h.mirror
            .register("fader", -20.0, "ns", WidgetConfig::default())
            .unwrap();
        assert!(!h.mirror.initialize("fader").unwrap());
        let published = h.outbox.drain_pending();
        assert_eq!(published.len(), 1);
        assert!(published[0].retain);
        assert_eq!(decoded(&published[0]).val, WidgetValue::Number(-20.0));
        assert_eq!(h.ui.drain(), 0);
    }

    #[test]
    fn initialize_with_unreadable_retained_state_announces_value() {
        let mut h = harness();
        h.cache
            .record("OPEN-AIR/ns/fader", Bytes::from_static(b"garbage"));
        h.mirror
            .register("fader", 1.0, "ns", WidgetConfig::default())
            .unwrap();
        assert!(!h.mirror.initialize("fader").unwrap());
        assert_eq!(h.outbox.drain_pending().len(), 1);
    }

    #[test]
    fn initialize_unknown_path_is_an_error() {
        let h = harness();
        assert!(matches!(
            h.mirror.initialize("ghost"),
            Err(MirrorError::NotRegistered(_))
        ));
    }

    #[test]
    fn table_initializes_from_cached_rows() {
        let mut h = harness();
        h.cache.record(
            "OPEN-AIR/ns/channels/data/2",
            Bytes::from_static(br#"{"name":"Lead vox","freq":"552.125"}"#),
        );
        h.cache.record(
            "OPEN-AIR/ns/channels/data/1",
            Bytes::from_static(br#"{"name":"Guitar","freq":"560.300"}"#),
        );
        h.mirror
            .register(
                "channels",
                WidgetValue::Record(Default::default()),
                "ns",
                WidgetConfig::new(WidgetKind::Table),
            )
            .unwrap();
        assert!(h.mirror.initialize("channels").unwrap());
        h.ui.drain();

        let Some(WidgetValue::Record(rows)) = h.mirror.value("channels") else {
            panic!("expected record");
        };
        assert_eq!(rows.keys().collect::<Vec<_>>(), ["1", "2"]);
        assert_eq!(rows["2"]["name"], "Lead vox");
        assert!(h.outbox.drain_pending().is_empty());
    }

    #[test]
    fn empty_table_does_not_announce() {
        let mut h = harness();
        h.mirror
            .register(
                "channels",
                WidgetValue::Record(Default::default()),
                "ns",
                WidgetConfig::new(WidgetKind::Table),
            )
            .unwrap();
        assert!(!h.mirror.initialize("channels").unwrap());
        assert!(h.outbox.drain_pending().is_empty());
    }

    fn table(h: &Harness) -> ValueHolder {
        h.mirror
            .register(
                "channels",
                WidgetValue::Record(Default::default()),
                "ns",
                WidgetConfig::new(WidgetKind::Table),
            )
            .unwrap()
    }

    #[test]
    fn table_rows_merge_as_they_arrive() {
        let mut h = harness();
        let holder = table(&h);
        assert_eq!(h.router.len(), 2);

        assert_eq!(
            h.router.dispatch(
                "OPEN-AIR/ns/channels/data/7",
                br#"{"name":"Bass","freq":"571.900"}"#
            ),
            1
        );
        h.router.dispatch("OPEN-AIR/ns/channels/data/3", b"plain text");
        assert_eq!(h.router.dispatch("OPEN-AIR/ns/channels/data/3/x", b"1"), 0);
        assert_eq!(h.ui.drain(), 2);

        let WidgetValue::Record(rows) = holder.get() else {
            panic!("expected record");
        };
        assert_eq!(rows.keys().collect::<Vec<_>>(), ["7", "3"]);
        assert_eq!(rows["7"]["name"], "Bass");
        assert_eq!(rows["3"], "plain text");
        assert!(h.outbox.drain_pending().is_empty());
        assert!(!holder.is_suppressed());

        h.router.dispatch("OPEN-AIR/ns/channels/data/7", b"");
        h.ui.drain();
        let WidgetValue::Record(rows) = holder.get() else {
            panic!("expected record");
        };
        assert_eq!(rows.keys().collect::<Vec<_>>(), ["3"]);
        assert!(h.outbox.drain_pending().is_empty());
    }

    #[test]
    fn table_initializes_from_transport_retained_rows() {
        let mut h = harness();
        h.bus
            .publish(
                "OPEN-AIR/ns/channels/data/1",
                Bytes::from_static(br#"{"name":"Guitar"}"#),
                true,
            )
            .unwrap();
        table(&h);
        assert!(h.cache.is_empty());

        assert!(h.mirror.initialize("channels").unwrap());
        h.ui.drain();
        let Some(WidgetValue::Record(rows)) = h.mirror.value("channels") else {
            panic!("expected record");
        };
        assert_eq!(rows["1"]["name"], "Guitar");
        assert!(h.outbox.drain_pending().is_empty());
    }

    #[test]
    fn re_registered_table_drops_row_route() {
        let h = harness();
        table(&h);
        table(&h);
        assert_eq!(h.router.len(), 2);
        h.mirror
            .register("channels", 0.0, "ns", WidgetConfig::default())
            .unwrap();
        assert_eq!(h.router.len(), 1);
        assert_eq!(h.router.dispatch("OPEN-AIR/ns/channels/data/1", b"{}"), 0);
    }
}
