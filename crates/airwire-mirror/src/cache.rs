//! Last-known payload per topic, fed by bus ingest and consulted when a
//! widget initializes.
//!
//! The cache can be persisted as a snapshot file so a restarted session
//! starts from the state it last saw. The file is a JSON object mapping each
//! topic to its payload as text, written to a sibling temp file and renamed
//! into place.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airwire_bus::topic;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MIN_TICK;
use crate::error::SnapshotError;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedState {
    pub payload: Bytes,
    pub ts: Option<f64>,
    pub val: Option<Value>,
}

impl CachedState {
    /// Extracts `ts` and `val` from JSON state records; any other JSON is kept
    /// as the value itself and non-JSON payloads are compared byte-wise.
    pub fn from_payload(payload: Bytes) -> Self {
        match serde_json::from_slice::<Value>(&payload) {
            Ok(Value::Object(map)) => Self {
                ts: map.get("ts").and_then(Value::as_f64),
                val: map.get("val").cloned(),
                payload,
            },
            Ok(other) => Self {
                ts: None,
                val: Some(other),
                payload,
            },
            Err(_) => Self {
                ts: None,
                val: None,
                payload,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct StateCache {
    entries: RwLock<HashMap<String, CachedState>>,
    dirty: AtomicBool,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `candidate` alters what is known for `topic`.
    ///
    /// A newer `ts` always wins and an identical `ts` is a duplicate. Without
    /// comparable timestamps the values decide.
    pub fn should_update(&self, topic: &str, candidate: &CachedState) -> bool {
        let entries = self.entries.read();
        let Some(cached) = entries.get(topic) else {
            return true;
        };
        if let (Some(incoming), Some(known)) = (candidate.ts, cached.ts) {
            if incoming > known {
                return true;
            }
            if incoming == known {
                return false;
            }
        }
        match (&candidate.val, &cached.val) {
            (None, None) => candidate.payload != cached.payload,
            (incoming, known) => incoming != known,
        }
    }

    /// Stores the payload if it changes the known state. Returns whether it
    /// did.
    pub fn record(&self, topic: &str, payload: Bytes) -> bool {
        let candidate = CachedState::from_payload(payload);
        if !self.should_update(topic, &candidate) {
            debug!(target = "cache", topic, "duplicate state ignored");
            return false;
        }
        self.entries.write().insert(topic.to_string(), candidate);
        self.dirty.store(true, Ordering::Release);
        true
    }

    pub fn get(&self, topic: &str) -> Option<CachedState> {
        self.entries.read().get(topic).cloned()
    }

    /// Direct children of `parent`, keyed by their last segment.
    pub fn children(&self, parent: &str) -> Vec<(String, CachedState)> {
        let prefix = format!("{parent}{}", topic::DELIMITER);
        let mut children: Vec<(String, CachedState)> = self
            .entries
            .read()
            .iter()
            .filter_map(|(name, state)| {
                let key = name.strip_prefix(&prefix)?;
                (!key.is_empty() && !key.contains(topic::DELIMITER))
                    .then(|| (key.to_string(), state.clone()))
            })
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether anything was recorded since the last successful save.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Writes every entry to `path`. Returns how many were written.
    pub fn save(&self, path: &Path) -> Result<usize, SnapshotError> {
        self.dirty.store(false, Ordering::Release);
        let snapshot: BTreeMap<String, String> = self
            .entries
            .read()
            .iter()
            .map(|(topic, state)| {
                (
                    topic.clone(),
                    String::from_utf8_lossy(&state.payload).into_owned(),
                )
            })
            .collect();
        let written = write_atomic(path, &snapshot).map_err(|err| {
            self.dirty.store(true, Ordering::Release);
            err
        })?;
        debug!(target = "cache", path = %path.display(), entries = written, "state snapshot saved");
        Ok(written)
    }

    /// Records every entry of the snapshot at `path`. A missing file is an
    /// empty snapshot. Returns how many entries changed the cache.
    pub fn load(&self, path: &Path) -> Result<usize, SnapshotError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(target = "cache", path = %path.display(), "no state snapshot");
                return Ok(0);
            }
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let snapshot: BTreeMap<String, String> =
            serde_json::from_slice(&raw).map_err(|source| SnapshotError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        let mut loaded = 0;
        for (topic, payload) in snapshot {
            if topic::is_publishable(&topic) && self.record(&topic, Bytes::from(payload)) {
                loaded += 1;
            }
        }
        // Freshly loaded state is already on disk.
        self.dirty.store(false, Ordering::Release);
        info!(target = "cache", path = %path.display(), entries = loaded, "state snapshot loaded");
        Ok(loaded)
    }
}

fn write_atomic(path: &Path, snapshot: &BTreeMap<String, String>) -> Result<usize, SnapshotError> {
    let io_err = |source: std::io::Error| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    let body = serde_json::to_vec_pretty(snapshot).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, body).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(snapshot.len())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Saves the cache to `path` on every tick that follows a change.
pub fn spawn_snapshot_writer(
    cache: Arc<StateCache>,
    path: PathBuf,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_TICK));
        loop {
            ticker.tick().await;
            if !cache.is_dirty() {
                continue;
            }
            if let Err(err) = cache.save(&path) {
                warn!(target = "cache", error = %err, "failed to save state snapshot");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(json: &'static str) -> Bytes {
        Bytes::from_static(json.as_bytes())
    }

    #[test]
    fn unseen_topic_is_new() {
        let cache = StateCache::new();
        assert!(cache.record("a", state(r#"{"val":1,"ts":1.0}"#)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn timestamps_decide_when_both_present() {
        let cache = StateCache::new();
        cache.record("a", state(r#"{"val":1,"ts":5.0}"#));
        assert!(!cache.record("a", state(r#"{"val":2,"ts":5.0}"#)));
        assert!(cache.record("a", state(r#"{"val":2,"ts":6.0}"#)));
        assert_eq!(cache.get("a").unwrap().val, Some(serde_json::json!(2)));
    }

    #[test]
    fn older_timestamp_falls_back_to_value_comparison() {
        let cache = StateCache::new();
        cache.record("a", state(r#"{"val":1,"ts":5.0}"#));
        assert!(!cache.record("a", state(r#"{"val":1,"ts":4.0}"#)));
        assert!(cache.record("a", state(r#"{"val":3,"ts":4.0}"#)));
    }

    #[test]
    fn raw_payloads_compare_bytes() {
        let cache = StateCache::new();
        assert!(cache.record("out", state("not json")));
        assert!(!cache.record("out", state("not json")));
        assert!(cache.record("out", state("still not json")));
        assert!(cache.record("num", state("12.5")));
        assert!(!cache.record("num", state("12.5")));
    }

    fn snapshot_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("airwire-cache-{}", uuid::Uuid::new_v4()))
            .join("state.json")
    }

    #[test]
    fn snapshot_round_trips_last_known_state() {
        let path = snapshot_path();
        let cache = StateCache::new();
        cache.record("OPEN-AIR/ns/fader", state(r#"{"val":-3.5,"ts":4.0,"GUID":"a"}"#));
        cache.record("OPEN-AIR/ns/table/data/1", state("not json"));
        assert!(cache.is_dirty());
        assert_eq!(cache.save(&path).unwrap(), 2);
        assert!(!cache.is_dirty());
        assert!(!temp_path(&path).exists());

        let restored = StateCache::new();
        assert_eq!(restored.load(&path).unwrap(), 2);
        assert!(!restored.is_dirty());
        assert_eq!(restored.get("OPEN-AIR/ns/fader"), cache.get("OPEN-AIR/ns/fader"));
        assert_eq!(
            restored.get("OPEN-AIR/ns/table/data/1").unwrap().payload,
            state("not json")
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_snapshot_is_empty_and_garbage_is_an_error() {
        let path = snapshot_path();
        let cache = StateCache::new();
        assert_eq!(cache.load(&path).unwrap(), 0);

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ truncated").unwrap();
        assert!(matches!(cache.load(&path), Err(SnapshotError::Json { .. })));
        assert!(cache.is_empty());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn writer_saves_after_changes() {
        let path = snapshot_path();
        let cache = Arc::new(StateCache::new());
        let writer = spawn_snapshot_writer(cache.clone(), path.clone(), Duration::from_millis(5));
        cache.record("a/b", state(r#"{"val":1}"#));
        tokio::time::timeout(Duration::from_secs(2), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("snapshot never written");
        writer.abort();

        let restored = StateCache::new();
        assert_eq!(restored.load(&path).unwrap(), 1);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn children_are_direct_descendants_only() {
        let cache = StateCache::new();
        cache.record("t/data/2", state(r#"{"val":"b"}"#));
        cache.record("t/data/1", state(r#"{"val":"a"}"#));
        cache.record("t/data/1/extra", state(r#"{"val":"x"}"#));
        cache.record("t/database", state(r#"{"val":"y"}"#));
        let keys: Vec<String> = cache.children("t/data").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["1", "2"]);
    }
}
