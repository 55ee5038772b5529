//! State values and key collections.
//!
//! Container state is a mapping of string keys to JSON values. Values are
//! shared behind `Arc` so views, caches, and snapshots can hand them around
//! without deep copies, and so the engine can apply its identity rule:
//! composites compare by reference, scalars by value.

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Raw container state: an insertion-ordered key/value mapping.
pub type StateMap = IndexMap<String, Value>;

/// The set of keys reported changed by a propagation pass.
pub type ChangedKeys = IndexSet<String>;

/// A shared state value.
///
/// Cloning is cheap (an `Arc` bump). Two handles to the same allocation are
/// always [`identical`](Value::identical); distinct allocations are identical
/// only when both are scalars with equal contents.
#[derive(Clone)]
pub struct Value(Arc<Json>);

impl Value {
    /// Wrap a JSON value.
    pub fn new(json: Json) -> Self {
        Self(Arc::new(json))
    }

    /// The JSON null value.
    pub fn null() -> Self {
        Self::new(Json::Null)
    }

    /// Borrow the underlying JSON value.
    pub fn json(&self) -> &Json {
        &self.0
    }

    /// Identity comparison.
    ///
    /// Shared allocations are identical. Otherwise scalars (null, bool,
    /// number, string) compare by value and composites (object, array) are
    /// never identical. This is the rule `set` uses for its no-op check;
    /// it is deliberately not deep equality.
    pub fn identical(&self, other: &Value) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        if self.is_composite() || other.is_composite() {
            return false;
        }
        self.0.as_ref() == other.0.as_ref()
    }

    fn is_composite(&self) -> bool {
        matches!(self.0.as_ref(), Json::Object(_) | Json::Array(_))
    }

    /// The value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    /// The value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }

    /// The value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    /// The value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.0.as_ref(), f)
    }
}

/// Deep equality, for assertions and snapshot comparisons. Identity checks
/// go through [`Value::identical`] instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Self::new(json)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::new(Json::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::new(Json::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::new(Json::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::new(Json::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::new(Json::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::new(Json::from(v))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Json::deserialize(deserializer).map(Value::new)
    }
}

/// Collect a state map into a single JSON object value.
///
/// Used to hand props to `initialize` and to serialize captured state.
pub fn object_value(map: &StateMap) -> Value {
    let object: serde_json::Map<String, Json> = map
        .iter()
        .map(|(k, v)| (k.clone(), v.json().clone()))
        .collect();
    Value::new(Json::Object(object))
}

/// Split a JSON object value back into a state map.
///
/// Returns `None` when the value is not an object.
pub fn object_entries(value: &Value) -> Option<StateMap> {
    match value.json() {
        Json::Object(object) => Some(
            object
                .iter()
                .map(|(k, v)| (k.clone(), Value::new(v.clone())))
                .collect(),
        ),
        _ => None,
    }
}

/// Human-readable kind of a JSON value, used in configuration errors.
pub(crate) fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
