//! JSON manipulation utilities for the flowrun engine.
//!
//! Provides the dotted-path field walks used by edge mappings and webhook
//! adapters, plus the input/output merge policy applied when upstream
//! outputs are propagated into downstream stored inputs.
//!
//! Dynamic property access is always an explicit, validated field walk:
//! unknown keys yield `None`, never a panic, and path strings that cannot
//! be parsed are rejected up front at graph-validation time.

use miette::Diagnostic;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from JSON path handling.
#[derive(Debug, Error, Diagnostic)]
pub enum JsonPathError {
    /// Path string that cannot be parsed into segments.
    #[error("invalid path: {path:?}")]
    #[diagnostic(
        code(flowrun::json::invalid_path),
        help("Paths are non-empty dot-separated field names, e.g. `result.items`.")
    )]
    InvalidPath { path: String },
}

/// Validate a mapping source path at compile time.
///
/// A valid path is a non-empty string of dot-separated, non-empty segments.
/// Leading/trailing dots and empty segments (`a..b`) are rejected.
pub fn validate_path(path: &str) -> Result<(), JsonPathError> {
    if path.is_empty() || path.split('.').any(|seg| seg.is_empty()) {
        return Err(JsonPathError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Resolve a dotted path against a JSON value.
///
/// Returns `None` when any segment is missing or the intermediate value is
/// not an object. Array indexing is deliberately unsupported: mappings name
/// fields, not positions.
///
/// # Examples
///
/// ```rust
/// use flowrun::utils::json_ext::resolve_path;
/// use serde_json::json;
///
/// let v = json!({"result": {"items": 3}});
/// assert_eq!(resolve_path(&v, "result.items"), Some(json!(3)));
/// assert_eq!(resolve_path(&v, "result.missing"), None);
/// assert_eq!(resolve_path(&v, "result"), Some(json!({"items": 3})));
/// ```
#[must_use]
pub fn resolve_path(value: &Value, path: &str) -> Option<Value> {
    if validate_path(path).is_err() {
        return None;
    }
    let mut cursor = value;
    for seg in path.split('.') {
        cursor = cursor.as_object()?.get(seg)?;
    }
    Some(cursor.clone())
}

/// Merge an upstream output into a stored input per the propagation policy.
///
/// - Both objects: shallow merge. Keys present in `patch` (explicitly mapped
///   values) overwrite keys in `base`; unmapped `base` keys pass through.
/// - Either side primitive (splitter seeds, scalar outputs): the pair is
///   preserved as a structured `{"input": base, "output": patch}` record
///   rather than spreading a primitive into an object.
/// - `base` of `Null` is treated as an empty object.
#[must_use]
pub fn merge_io(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Null, p) => p,
        (b, Value::Null) => b,
        (Value::Object(mut b), Value::Object(p)) => {
            for (k, v) in p {
                b.insert(k, v);
            }
            Value::Object(b)
        }
        (b, p) => {
            let mut wrapped = Map::new();
            wrapped.insert("input".to_string(), b);
            wrapped.insert("output".to_string(), p);
            Value::Object(wrapped)
        }
    }
}

/// Key-order-independent canonical equality for JSON documents.
///
/// `serde_json::Value::eq` already compares objects as maps; this wrapper
/// exists so call sites state intent (version deep-compare) and to absorb a
/// serialize round-trip for values that arrived through different builders.
#[must_use]
pub fn canonically_equal(a: &Value, b: &Value) -> bool {
    a == b
}
