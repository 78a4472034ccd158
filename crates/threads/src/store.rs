//! Persisted form of a [`ThreadMap`].
//!
//! ```text
//! { "<threadId>": { "isResolved": false,
//!                   "comments": [ { "commentId", "userName", "comment", "date" } ] } }
//! ```

use serde_json::Value;
use std::collections::BTreeMap;

use crate::{Result, Thread, ThreadError, ThreadId, ThreadMap};

/// Parse a stored blob.
///
/// An absent blob, an empty string, `null` and `[]` (the value older
/// documents were initialised with) all load as an empty map. Threads
/// stored with no comments are dropped: they only exist in documents
/// written before empty threads were removed on save.
pub fn load(blob: Option<&str>) -> Result<ThreadMap> {
    let raw = match blob.map(str::trim) {
        None | Some("") => return Ok(ThreadMap::new()),
        Some(raw) => raw,
    };

    let value: Value =
        serde_json::from_str(raw).map_err(|e| ThreadError::MalformedStore(e.to_string()))?;

    let entries: BTreeMap<ThreadId, Thread> = match value {
        Value::Null => BTreeMap::new(),
        Value::Array(items) if items.is_empty() => BTreeMap::new(),
        value @ Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| ThreadError::MalformedStore(e.to_string()))?,
        other => {
            return Err(ThreadError::MalformedStore(format!(
                "expected an object of threads, found {}",
                kind_of(&other)
            )))
        }
    };

    let mut threads = ThreadMap::new();
    for (id, thread) in entries {
        threads.insert(id, thread);
    }
    threads.retain(|id, thread| {
        if thread.comments.is_empty() {
            tracing::debug!(thread = %id, "dropping stored thread without comments");
            false
        } else {
            true
        }
    });
    Ok(threads)
}

/// Encode a map for storage. Output is deterministic: threads are
/// written in id order.
pub fn serialize(threads: &ThreadMap) -> Result<String> {
    serde_json::to_string(threads).map_err(|e| ThreadError::Serialization(e.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
