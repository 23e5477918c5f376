/// Runtime message model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provenance field set by the link relay
pub const EVENT_FIELD: &str = "_event";

/// Message id field, assigned on creation
pub const MSGID_FIELD: &str = "_msgid";

/// A message travelling between nodes
///
/// Always a JSON object. Cloning is a deep copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// New message carrying `payload`, with a fresh `_msgid`
    pub fn new(payload: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert("payload".to_string(), payload.into());
        Self::from_map(fields)
    }

    /// Wrap `fields`, assigning a `_msgid` if absent
    pub fn from_map(mut fields: Map<String, Value>) -> Self {
        if !fields.contains_key(MSGID_FIELD) {
            fields.insert(
                MSGID_FIELD.to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        Self(fields)
    }

    /// Build from a bus payload; non-object values become the payload
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self::from_map(fields),
            other => Self::new(other),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn payload(&self) -> Option<&Value> {
        self.0.get("payload")
    }

    pub fn msgid(&self) -> Option<&str> {
        self.0.get(MSGID_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Message> for Value {
    fn from(msg: Message) -> Self {
        msg.into_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_messages_get_an_id() {
        let a = Message::new(1);
        let b = Message::new(1);
        assert_eq!(a.payload(), Some(&json!(1)));
        assert!(a.msgid().is_some());
        assert_ne!(a.msgid(), b.msgid());
    }

    #[test]
    fn from_value_keeps_objects_and_wraps_scalars() {
        let kept = Message::from_value(json!({"payload": "x", "_msgid": "m1", "topic": "t"}));
        assert_eq!(kept.msgid(), Some("m1"));
        assert_eq!(kept.get("topic"), Some(&json!("t")));

        let wrapped = Message::from_value(json!(42));
        assert_eq!(wrapped.payload(), Some(&json!(42)));
    }

    #[test]
    fn clones_are_independent() {
        let mut original = Message::new(json!({"n": 1}));
        let copy = original.clone();
        original.set("payload", json!({"n": 2}));
        assert_eq!(copy.payload(), Some(&json!({"n": 1})));
    }
}
