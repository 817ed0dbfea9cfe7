//! Record types and ordering keys.

use crate::{error::Result, Error, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Origin of a change applied to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Applied optimistically by a local mutation (or its rollback)
    Local,
    /// Applied from a remote notification
    Remote,
}

/// Server-assigned ordering value of a record.
///
/// Ordering rules:
/// 1. `None` sorts before everything
/// 2. Numbers sort before text, compared with a total order
/// 3. Text compares lexicographically
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Priority {
    #[default]
    None,
    Number(f64),
    Text(String),
}

impl Priority {
    /// Parse an ordering value from JSON.
    ///
    /// `null` maps to [`Priority::None`]; booleans, arrays and objects are
    /// not orderable.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Priority::None),
            Value::Number(n) => n
                .as_f64()
                .map(Priority::Number)
                .ok_or_else(|| Error::InvalidPayload(format!("unrepresentable priority {n}"))),
            Value::String(s) => Ok(Priority::Text(s.clone())),
            other => Err(Error::InvalidPayload(format!(
                "priority must be null, a number or a string, got {other}"
            ))),
        }
    }

    /// Convert back to JSON. Fails for numbers JSON cannot carry.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Priority::None => Ok(Value::Null),
            Priority::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .ok_or_else(|| non_finite(*n)),
            Priority::Text(s) => Ok(Value::String(s.clone())),
        }
    }

    /// Reject priorities that cannot be stored remotely: NaN and infinities.
    pub fn validate(&self) -> Result<()> {
        match self {
            Priority::Number(n) if !n.is_finite() => Err(non_finite(*n)),
            _ => Ok(()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Priority::None => 0,
            Priority::Number(_) => 1,
            Priority::Text(_) => 2,
        }
    }
}

fn non_finite(n: f64) -> Error {
    Error::InvalidPayload(format!("priority must be a finite number, got {n}"))
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Priority::Number(a), Priority::Number(b)) => a.total_cmp(b),
            (Priority::Text(a), Priority::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl From<f64> for Priority {
    fn from(n: f64) -> Self {
        Priority::Number(n)
    }
}

impl From<i64> for Priority {
    fn from(n: i64) -> Self {
        Priority::Number(n as f64)
    }
}

impl From<i32> for Priority {
    fn from(n: i32) -> Self {
        Priority::Number(f64::from(n))
    }
}

impl From<&str> for Priority {
    fn from(s: &str) -> Self {
        Priority::Text(s.to_string())
    }
}

impl From<String> for Priority {
    fn from(s: String) -> Self {
        Priority::Text(s)
    }
}

/// Total ordering key of a record: priority first, id breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey<'a> {
    pub priority: &'a Priority,
    pub id: &'a str,
}

impl<'a> SortKey<'a> {
    pub fn new(priority: &'a Priority, id: &'a str) -> Self {
        Self { priority, id }
    }
}

/// The data carried by a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum RecordBody {
    /// A map of named fields
    Structured(Map<String, Value>),
    /// A single scalar (string, number or boolean)
    Primitive(Value),
}

impl RecordBody {
    /// Build a body from a JSON payload.
    ///
    /// Arrays are stored as maps keyed by their index, the way the remote
    /// store keeps them.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(RecordBody::Structured(map)),
            Value::Array(items) => Ok(RecordBody::Structured(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
            )),
            Value::Null => Err(Error::InvalidPayload("payload must not be null".into())),
            scalar => Ok(RecordBody::Primitive(scalar)),
        }
    }

    /// The JSON payload written to the remote store.
    pub fn to_value(&self) -> Value {
        match self {
            RecordBody::Structured(map) => Value::Object(map.clone()),
            RecordBody::Primitive(value) => value.clone(),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, RecordBody::Structured(_))
    }
}

/// A record in the mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique, immutable identifier
    pub id: RecordId,
    /// Server-assigned ordering value
    #[serde(default)]
    pub priority: Priority,
    /// The record's data
    pub body: RecordBody,
}

impl Record {
    /// Create a new record.
    pub fn new(id: impl Into<RecordId>, priority: Priority, body: RecordBody) -> Self {
        Self {
            id: id.into(),
            priority,
            body,
        }
    }

    /// Create a record from a raw JSON payload.
    pub fn from_payload(id: impl Into<RecordId>, priority: Priority, payload: Value) -> Result<Self> {
        Ok(Self::new(id, priority, RecordBody::from_value(payload)?))
    }

    pub fn sort_key(&self) -> SortKey<'_> {
        SortKey::new(&self.priority, &self.id)
    }

    /// Look up a named field of a structured record.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match &self.body {
            RecordBody::Structured(map) => map.get(name),
            RecordBody::Primitive(_) => None,
        }
    }

    /// The scalar value of a primitive record.
    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            RecordBody::Primitive(value) => Some(value),
            RecordBody::Structured(_) => None,
        }
    }

    /// The JSON payload written to the remote store.
    pub fn to_payload(&self) -> Value {
        self.body.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_ordering_across_kinds() {
        let none = Priority::None;
        let low = Priority::from(1);
        let high = Priority::from(2.5);
        let text = Priority::from("a");

        assert!(none < low);
        assert!(low < high);
        assert!(high < text);
        assert!(Priority::from("a") < Priority::from("b"));
        assert_eq!(Priority::from(3), Priority::from(3.0));
    }

    #[test]
    fn sort_key_breaks_ties_by_id() {
        let p = Priority::from(1);
        let a = SortKey::new(&p, "a");
        let b = SortKey::new(&p, "b");
        assert!(a < b);

        let lower = Priority::from(0);
        assert!(SortKey::new(&lower, "z") < a);
    }

    #[test]
    fn priority_from_value() {
        assert_eq!(Priority::from_value(&json!(null)).unwrap(), Priority::None);
        assert_eq!(Priority::from_value(&json!(4)).unwrap(), Priority::from(4));
        assert_eq!(
            Priority::from_value(&json!("x")).unwrap(),
            Priority::from("x")
        );
        assert!(matches!(
            Priority::from_value(&json!(true)),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn non_finite_priorities_are_invalid() {
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let priority = Priority::from(n);
            assert!(matches!(priority.validate(), Err(Error::InvalidPayload(_))));
            assert!(matches!(priority.to_value(), Err(Error::InvalidPayload(_))));
        }
        assert_eq!(Priority::from(2.5).to_value().unwrap(), json!(2.5));
        assert_eq!(Priority::None.to_value().unwrap(), Value::Null);
        assert!(Priority::from("m").validate().is_ok());
    }

    #[test]
    fn body_from_value() {
        let body = RecordBody::from_value(json!({"title": "milk"})).unwrap();
        assert!(body.is_structured());

        let body = RecordBody::from_value(json!(42)).unwrap();
        assert_eq!(body, RecordBody::Primitive(json!(42)));

        let body = RecordBody::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(body.to_value(), json!({"0": "a", "1": "b"}));

        assert!(RecordBody::from_value(json!(null)).is_err());
    }

    #[test]
    fn record_accessors() {
        let record = Record::from_payload("r1", Priority::None, json!({"x": 1})).unwrap();
        assert_eq!(record.field("x"), Some(&json!(1)));
        assert_eq!(record.value(), None);

        let record = Record::from_payload("r2", Priority::None, json!("hello")).unwrap();
        assert_eq!(record.value(), Some(&json!("hello")));
        assert_eq!(record.field("x"), None);
        assert_eq!(record.to_payload(), json!("hello"));
    }

    #[test]
    fn serialization_roundtrip() {
        let record = Record::from_payload("r1", Priority::from(7), json!({"x": 1})).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"structured\""));
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
