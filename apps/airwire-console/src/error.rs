use airwire_bus::TopicError;
use airwire_mirror::MirrorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error(transparent)]
    Filter(#[from] TopicError),
}
