use std::path::PathBuf;

use airwire_bus::{BusError, TopicError};
use thiserror::Error;

use crate::widget::WidgetKind;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("widget path must not be empty")]
    EmptyPath,
    #[error("widget path {0:?} cannot form a publishable topic")]
    InvalidPath(String),
    #[error("widget {0:?} is not registered")]
    NotRegistered(String),
    #[error("malformed state payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("value {value} is not valid for a {kind:?} widget")]
    Coerce { kind: WidgetKind, value: String },
    #[error(transparent)]
    Filter(#[from] TopicError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("outbox closed")]
    OutboxClosed,
    #[error("ui queue closed")]
    UiClosed,
}

pub type MirrorResult<T> = Result<T, MirrorError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("state snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state snapshot {path} is not valid json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("no pending command for correlation id {0}")]
    UnknownCorrelation(String),
    #[error("reply has {received} fields but the schema expects {expected}")]
    FieldCountMismatch { expected: usize, received: usize },
    #[error("malformed reply payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("reply payload is missing {0:?}")]
    MissingField(&'static str),
    #[error("outbox closed")]
    OutboxClosed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("command {command} declares outputs {declared:?} but the device replies in order {reply_order:?}")]
    OrderMismatch {
        command: String,
        declared: Vec<String>,
        reply_order: Vec<String>,
    },
    #[error("command {command} declares output {field:?} more than once")]
    DuplicateField { command: String, field: String },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no command declared at {0:?}")]
    UnknownCommand(String),
    #[error("template {template:?} has no value for placeholder {placeholder:?}")]
    MissingPlaceholder {
        template: String,
        placeholder: String,
    },
    #[error("unbalanced braces in template {0:?}")]
    MalformedTemplate(String),
    #[error("malformed command parameters: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("command parameters must be a JSON object")]
    ParamsNotObject,
    #[error("outbox closed")]
    OutboxClosed,
}
