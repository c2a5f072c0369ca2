//! Attribute maps and change deltas.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flat field name → value mapping held by a model.
pub type Attributes = serde_json::Map<String, Value>;

/// The delta of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Previous value (`None` when the field did not exist)
    pub old_value: Option<Value>,
    pub new_value: Value,
}

/// All field deltas produced by one `set` call, keyed by field name.
pub type Changes = BTreeMap<String, Change>;

/// Whether writing `new` over `current` would leave the field unchanged.
///
/// Composite values compare by content, so an object with the same keys and
/// values in both directions counts as unchanged.
pub fn is_unchanged(current: Option<&Value>, new: &Value) -> bool {
    current == Some(new)
}

/// Coerce an arbitrary JSON value into an attribute map.
///
/// Objects are taken as-is; `null` yields an empty map. Anything else is
/// not a valid record.
pub fn from_value(value: Value) -> Option<Attributes> {
    match value {
        Value::Object(map) => Some(map),
        Value::Null => Some(Attributes::new()),
        _ => None,
    }
}
