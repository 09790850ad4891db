//! Bookkeeping for fire-and-forget instrument commands.
//!
//! Every submitted command gets a fresh correlation id and keeps the context
//! needed to interpret its reply until the reply arrives or the entry times
//! out. Lifecycle per command: `Submitted -> {Resolved | TimedOut}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MIN_TICK;
use crate::reply::OutputSchema;

#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub correlation_id: String,
    pub path_parts: Vec<String>,
    pub output_schema: OutputSchema,
    pub submitted_at: Instant,
}

impl PendingCommand {
    fn expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.submitted_at) >= timeout
    }
}

/// Context returned for a reply that matched a pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub path_parts: Vec<String>,
    pub output_schema: OutputSchema,
    pub raw_reply: String,
}

#[derive(Clone)]
pub struct CommandCorrelator {
    inner: Arc<CorrelatorInner>,
}

struct CorrelatorInner {
    pending: Mutex<HashMap<String, PendingCommand>>,
    timeout: Duration,
}

impl CommandCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                pending: Mutex::new(HashMap::new()),
                timeout,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Fresh correlation id for a command that expects no reply and is
    /// therefore never tracked.
    pub fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Records a new command and returns its correlation id.
    pub fn submit(&self, path_parts: Vec<String>, output_schema: OutputSchema) -> String {
        let correlation_id = self.next_id();
        let entry = PendingCommand {
            correlation_id: correlation_id.clone(),
            path_parts,
            output_schema,
            submitted_at: Instant::now(),
        };
        self.inner
            .pending
            .lock()
            .insert(correlation_id.clone(), entry);
        debug!(target = "correlator", correlation_id = %correlation_id, "command submitted");
        correlation_id
    }

    /// Removes and returns the context for `correlation_id`. Unknown and
    /// expired ids resolve to `None`.
    pub fn resolve(&self, correlation_id: &str, raw_reply: &str) -> Option<ResolvedCommand> {
        let entry = self.inner.pending.lock().remove(correlation_id);
        let Some(entry) = entry else {
            warn!(target = "correlator", correlation_id, "no pending command for reply");
            return None;
        };
        if entry.expired(Instant::now(), self.inner.timeout) {
            warn!(target = "correlator", correlation_id, "reply arrived after timeout");
            return None;
        }
        debug!(target = "correlator", correlation_id, "reply correlated");
        Some(ResolvedCommand {
            path_parts: entry.path_parts,
            output_schema: entry.output_schema,
            raw_reply: raw_reply.to_string(),
        })
    }

    /// Drops every entry older than the timeout as of `now`. Returns how many
    /// were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let timeout = self.inner.timeout;
        let mut pending = self.inner.pending.lock();
        let before = pending.len();
        pending.retain(|id, entry| {
            let expired = entry.expired(now, timeout);
            if expired {
                warn!(
                    target = "correlator",
                    correlation_id = %id,
                    path = %entry.path_parts.join("/"),
                    "command timed out"
                );
            }
            !expired
        });
        before - pending.len()
    }

    /// Periodically drops expired entries. Periods below [`MIN_TICK`] are
    /// raised to it.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let correlator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_TICK));
            loop {
                ticker.tick().await;
                correlator.sweep_expired(Instant::now());
            }
        })
    }

    /// Forgets a command whose request never left the process.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.inner.pending.lock().remove(correlation_id).is_some()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.inner.pending.lock().contains_key(correlation_id)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }
}
