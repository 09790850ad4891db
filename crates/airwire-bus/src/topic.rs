//! Topic addressing: composing canonical topics, deriving namespaces from
//! structural locations, and matching subscription filters.
//!
//! Topics are slash-delimited and case-sensitive. The wildcard tokens `+`
//! (exactly one segment) and `#` (the remainder, trailing only) are legal in
//! subscription filters and never in published topics.

use std::path::{Component, Path};

use thiserror::Error;

pub const DELIMITER: char = '/';
pub const SINGLE_LEVEL: &str = "+";
pub const MULTI_LEVEL: &str = "#";

/// Segments that only describe presentation layout and never carry meaning.
const MARKER_SEGMENTS: &[&str] = &["display", "GUI", "gui"];
const MARKER_PREFIXES: &[&str] = &["left_", "right_", "top_", "bottom_"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic filter is empty")]
    EmptyFilter,
    #[error("invalid wildcard placement in filter {0:?}")]
    InvalidWildcard(String),
}

/// Joins parts into a canonical topic, dropping empty segments (including
/// the ones produced by leading or doubled slashes inside a part).
pub fn join<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut topic = String::new();
    for part in parts {
        for segment in part.as_ref().split(DELIMITER).filter(|s| !s.is_empty()) {
            if !topic.is_empty() {
                topic.push(DELIMITER);
            }
            topic.push_str(segment);
        }
    }
    topic
}

/// Derives a topic fragment from a structural location relative to `root`.
///
/// Layout markers are dropped, ordinal prefixes such as `01_` are stripped
/// and spaces become underscores. Anything outside `root` yields an empty
/// fragment.
pub fn derive_namespace(location: &Path, root: &Path) -> String {
    let Ok(relative) = location.strip_prefix(root) else {
        return String::new();
    };

    let mut segments = Vec::new();
    for component in relative.components() {
        let part = match component {
            Component::Normal(part) => part.to_string_lossy(),
            Component::CurDir => continue,
            _ => return String::new(),
        };
        if is_marker(&part) {
            continue;
        }
        let cleaned = strip_ordinal(&part).replace(' ', "_");
        if !cleaned.is_empty() {
            segments.push(cleaned);
        }
    }
    join(segments)
}

fn is_marker(segment: &str) -> bool {
    MARKER_SEGMENTS.contains(&segment)
        || MARKER_PREFIXES
            .iter()
            .any(|prefix| segment.starts_with(prefix))
}

fn strip_ordinal(segment: &str) -> &str {
    let digits = segment.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && segment[digits..].starts_with('_') {
        &segment[digits + 1..]
    } else {
        segment
    }
}

/// Checks that wildcards occupy whole segments and `#` only appears last.
pub fn validate_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::EmptyFilter);
    }
    let segments: Vec<&str> = filter.split(DELIMITER).collect();
    let last = segments.len() - 1;
    for (idx, segment) in segments.iter().enumerate() {
        let wild = segment.contains('#') || segment.contains('+');
        let ok = match *segment {
            MULTI_LEVEL => idx == last,
            SINGLE_LEVEL => true,
            _ => !wild,
        };
        if !ok {
            return Err(TopicError::InvalidWildcard(filter.to_string()));
        }
    }
    Ok(())
}

/// A topic that can be published to: non-empty and free of wildcards.
pub fn is_publishable(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#'])
}

/// Matches a concrete topic against a (validated) subscription filter.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_segments = filter.split(DELIMITER);
    let mut topic_segments = topic.split(DELIMITER);
    loop {
        match (filter_segments.next(), topic_segments.next()) {
            (Some(MULTI_LEVEL), _) => return true,
            (Some(SINGLE_LEVEL), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
