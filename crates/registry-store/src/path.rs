//! Dot-path addressing inside nested documents.
//!
//! `"package.name"` addresses `doc["package"]["name"]`. Only mappings are
//! traversed: array segments are not supported.

use crate::value::{Document, Value};

/// Resolve the value at `path`. Returns `None` when any segment is absent
/// or an intermediate value is not a mapping.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write `value` at `path`, creating an empty mapping at every intermediate
/// segment that is missing or not itself a mapping.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(last) => last,
        None => return,
    };

    let mut current = doc;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if !matches!(slot, Value::Object(_)) {
            if matches!(slot, Value::Array(_)) {
                tracing::debug!(path, segment, "replacing array with mapping on dot-path write");
            }
            *slot = Value::Object(Document::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
    current.insert(last.to_string(), value);
}
