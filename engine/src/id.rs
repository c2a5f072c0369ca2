//! Model keys: the server-assigned identity and the client-side internal id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Client-generated internal id, assigned once when a model is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned primary key.
///
/// Built from the `id` attribute. Numbers and non-empty strings are valid
/// identities; `5` and `"5"` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Int(i64),
    Str(String),
}

impl Identity {
    /// Extract an identity from an attribute value.
    ///
    /// Returns `None` for null, empty strings, booleans, composites and
    /// non-integral numbers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
                .map(Identity::Int),
            Value::String(s) if !s.is_empty() => Some(Identity::Str(s.clone())),
            _ => None,
        }
    }

    /// The identity as an attribute value.
    pub fn to_value(&self) -> Value {
        match self {
            Identity::Int(n) => Value::from(*n),
            Identity::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Int(n) => write!(f, "{n}"),
            Identity::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Identity {
    fn from(n: i64) -> Self {
        Identity::Int(n)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity::Str(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Identity::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cids_are_unique() {
        let a = Cid::generate();
        let b = Cid::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn identity_from_value() {
        assert_eq!(Identity::from_value(&json!(5)), Some(Identity::Int(5)));
        assert_eq!(Identity::from_value(&json!(0)), Some(Identity::Int(0)));
        assert_eq!(
            Identity::from_value(&json!("abc")),
            Some(Identity::Str("abc".into()))
        );
        assert_eq!(Identity::from_value(&json!("")), None);
        assert_eq!(Identity::from_value(&json!(null)), None);
        assert_eq!(Identity::from_value(&json!(true)), None);
        assert_eq!(Identity::from_value(&json!(1.5)), None);
        assert_eq!(Identity::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn identity_display_and_value() {
        assert_eq!(Identity::Int(42).to_string(), "42");
        assert_eq!(Identity::from("msg-1").to_string(), "msg-1");
        assert_eq!(Identity::Int(42).to_value(), json!(42));
        assert_eq!(Identity::from("msg-1").to_value(), json!("msg-1"));
    }
}
