//! Widget values and the observable holder that owns them on the UI side.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Most recently known value of a widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetValue {
    Bool(bool),
    Number(f64),
    Text(String),
    /// Ordered record for composite widgets (tables, multi-channel faders).
    Record(serde_json::Map<String, serde_json::Value>),
}

impl fmt::Display for WidgetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetValue::Bool(b) => write!(f, "{b}"),
            WidgetValue::Number(n) => write!(f, "{n}"),
            WidgetValue::Text(s) => f.write_str(s),
            WidgetValue::Record(map) => {
                let json = serde_json::Value::Object(map.clone());
                write!(f, "{json}")
            }
        }
    }
}

impl From<bool> for WidgetValue {
    fn from(value: bool) -> Self {
        WidgetValue::Bool(value)
    }
}

impl From<f64> for WidgetValue {
    fn from(value: f64) -> Self {
        WidgetValue::Number(value)
    }
}

impl From<&str> for WidgetValue {
    fn from(value: &str) -> Self {
        WidgetValue::Text(value.to_string())
    }
}

impl From<String> for WidgetValue {
    fn from(value: String) -> Self {
        WidgetValue::Text(value)
    }
}

pub type Listener = Arc<dyn Fn(&WidgetValue) + Send + Sync>;

/// A locally owned value that notifies its listeners synchronously on every
/// assignment.
///
/// Remote assignments go through [`ValueHolder::set_remote`], which raises the
/// suppress flag for exactly the duration of the notification. A listener
/// that forwards changes to the bus checks [`ValueHolder::take_suppressed`]
/// and stays quiet for echoes.
#[derive(Clone)]
pub struct ValueHolder {
    inner: Arc<HolderInner>,
}

struct HolderInner {
    value: Mutex<WidgetValue>,
    listeners: Mutex<Vec<Listener>>,
    suppress_next_publish: AtomicBool,
    local_epoch: AtomicU64,
}

impl ValueHolder {
    pub fn new(initial: impl Into<WidgetValue>) -> Self {
        Self {
            inner: Arc::new(HolderInner {
                value: Mutex::new(initial.into()),
                listeners: Mutex::new(Vec::new()),
                suppress_next_publish: AtomicBool::new(false),
                local_epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn get(&self) -> WidgetValue {
        self.inner.value.lock().clone()
    }

    /// Local assignment from user interaction or internal computation.
    pub fn set(&self, value: impl Into<WidgetValue>) {
        self.inner.local_epoch.fetch_add(1, Ordering::SeqCst);
        self.store_and_notify(value.into());
    }

    /// Assignment of a value that came from the bus.
    pub fn set_remote(&self, value: impl Into<WidgetValue>) {
        self.inner
            .suppress_next_publish
            .store(true, Ordering::SeqCst);
        self.store_and_notify(value.into());
        self.inner
            .suppress_next_publish
            .store(false, Ordering::SeqCst);
    }

    /// Consumes the suppress flag, returning whether it was set.
    pub fn take_suppressed(&self) -> bool {
        self.inner
            .suppress_next_publish
            .swap(false, Ordering::SeqCst)
    }

    pub fn is_suppressed(&self) -> bool {
        self.inner.suppress_next_publish.load(Ordering::SeqCst)
    }

    /// Count of local assignments so far.
    pub fn local_epoch(&self) -> u64 {
        self.inner.local_epoch.load(Ordering::SeqCst)
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&WidgetValue) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    fn store_and_notify(&self, value: WidgetValue) {
        *self.inner.value.lock() = value.clone();
        let listeners: Vec<Listener> = self.inner.listeners.lock().clone();
        for listener in listeners {
            listener(&value);
        }
    }
}

impl fmt::Debug for ValueHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueHolder")
            .field("value", &self.get())
            .field("suppressed", &self.is_suppressed())
            .field("local_epoch", &self.local_epoch())
            .finish()
    }
}
