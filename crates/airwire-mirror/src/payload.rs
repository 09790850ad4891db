use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::value::WidgetValue;

/// Origin of a state publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Gui,
    Remote,
}

fn remote() -> Source {
    Source::Remote
}

/// Widget state record carried on every state topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub val: WidgetValue,
    #[serde(default = "remote")]
    pub src: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<f64>,
    #[serde(rename = "GUID", default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl StatePayload {
    pub fn new(val: WidgetValue, src: Source, session: &str) -> Self {
        Self {
            val,
            src,
            ts: Some(unix_seconds()),
            session: Some(session.to_string()),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Command sent to the instrument proxy inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
    pub query: bool,
    pub correlation_id: String,
}

/// Reply published by the instrument proxy. Every field is optional on the
/// wire; the command service reports which one is missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplyPayload {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

pub fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
