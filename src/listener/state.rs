//! Immutable snapshot of a listener's auxiliary memory.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value snapshot of a [`Stateful`](super::Stateful) listener.
///
/// Values are nested maps and lists of scalars or null, i.e. anything that
/// has a JSON representation. Every mutator returns a new state; equality
/// is deep and structural.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerState(Map<String, Value>);

impl ListenerState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a state from a JSON object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidListenerState(format!(
                "expected an object, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Return a copy of this state with `name` set to `value`.
    pub fn set(&self, name: &str, value: impl Serialize) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidListenerState(
                "state keys must not be empty".into(),
            ));
        }
        let value = serde_json::to_value(value)
            .map_err(|e| Error::InvalidListenerState(format!("{name}: {e}")))?;

        let mut map = self.0.clone();
        map.insert(name.to_string(), value);
        Ok(Self(map))
    }

    /// Return a copy of this state without `name`.
    pub fn remove(&self, name: &str) -> Self {
        let mut map = self.0.clone();
        map.remove(name);
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Decode a single entry.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::InvalidListenerState(format!("{name}: {e}"))),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_set_returns_new_state() {
        let empty = ListenerState::empty();
        let one = empty.set("count", 1).unwrap();

        assert!(empty.is_empty());
        assert_eq!(one.get("count"), Some(&json!(1)));
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn test_structural_equality() {
        let a = ListenerState::empty()
            .set("nested", json!({ "list": [1, null, "x"], "flag": true }))
            .unwrap()
            .set("n", 2)
            .unwrap();
        let b = ListenerState::empty()
            .set("n", 2)
            .unwrap()
            .set("nested", json!({ "flag": true, "list": [1, null, "x"] }))
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, b.set("n", 3).unwrap());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys have no JSON form");

        let result = ListenerState::empty().set("bad", bad);
        assert!(matches!(result, Err(Error::InvalidListenerState(_))));

        let result = ListenerState::empty().set("", 1);
        assert!(matches!(result, Err(Error::InvalidListenerState(_))));

        let result = ListenerState::from_json(json!([1, 2]));
        assert!(matches!(result, Err(Error::InvalidListenerState(_))));
    }

    #[test]
    fn test_json_roundtrip_and_typed_access() {
        let state = ListenerState::empty().set("seen", vec!["a", "b"]).unwrap();
        let restored = ListenerState::from_json(state.to_json()).unwrap();

        assert_eq!(state, restored);
        let seen: Vec<String> = restored.get_as("seen").unwrap().unwrap();
        assert_eq!(seen, vec!["a", "b"]);
        assert!(restored.get_as::<u32>("missing").unwrap().is_none());
        assert!(!restored.remove("seen").has("seen"));
    }
}
