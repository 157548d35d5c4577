//! Response projections
//!
//! A response body is a fixed list of attribute names looked up on one or
//! more [`AttributeSource`]s, first match wins. Stored fields come from a
//! [`FieldSource`]; values computed from the record come from a
//! [`DerivedSource`]. Deferred values are evaluated and collections are
//! collected into arrays before the body is serialized.

use serde::Serialize;
use serde_json::{Map, Value};

/// A value produced by an attribute source
pub enum AttributeValue {
    Value(Value),
    /// Computed on demand
    Deferred(Box<dyn FnOnce() -> AttributeValue + Send>),
    /// Materialized into an array in iteration order
    Collection(Box<dyn Iterator<Item = AttributeValue> + Send>),
}

impl AttributeValue {
    pub fn deferred<F>(compute: F) -> Self
    where
        F: FnOnce() -> AttributeValue + Send + 'static,
    {
        Self::Deferred(Box::new(compute))
    }

    pub fn collection<I>(items: I) -> Self
    where
        I: IntoIterator<Item = AttributeValue>,
        I::IntoIter: Send + 'static,
    {
        Self::Collection(Box::new(items.into_iter()))
    }

    /// Evaluate to plain JSON
    pub fn into_json(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Deferred(compute) => compute().into_json(),
            Self::Collection(items) => Value::Array(items.map(Self::into_json).collect()),
        }
    }
}

impl From<Value> for AttributeValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<Option<String>> for AttributeValue {
    fn from(value: Option<String>) -> Self {
        Self::Value(value.map(Value::String).unwrap_or(Value::Null))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

/// Something attributes can be read from
pub trait AttributeSource {
    /// `None` if this source does not know `name`
    fn attribute(&self, name: &str) -> Option<AttributeValue>;
}

/// Direct access to a record's serialized fields
pub struct FieldSource {
    fields: Map<String, Value>,
}

impl FieldSource {
    /// Serialize `record`; anything that is not a JSON object has no fields
    pub fn new<T: Serialize>(record: &T) -> Self {
        let fields = match serde_json::to_value(record) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => Map::new(),
            Err(error) => {
                tracing::warn!(error = %error, "Record could not be serialized for projection");
                Map::new()
            }
        };
        Self { fields }
    }
}

impl AttributeSource for FieldSource {
    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.fields.get(name).cloned().map(AttributeValue::Value)
    }
}

type Derivation<T> = fn(&T) -> AttributeValue;

/// Attributes computed from a record
pub struct DerivedSource<'a, T: 'static> {
    record: &'a T,
    derivations: &'static [(&'static str, Derivation<T>)],
}

impl<'a, T: 'static> DerivedSource<'a, T> {
    pub fn new(record: &'a T, derivations: &'static [(&'static str, Derivation<T>)]) -> Self {
        Self {
            record,
            derivations,
        }
    }
}

impl<T: 'static> AttributeSource for DerivedSource<'_, T> {
    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.derivations
            .iter()
            .find(|(derived, _)| *derived == name)
            .map(|(_, derive)| derive(self.record))
    }
}

/// Fixed set of attribute names rendered as a JSON object
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    attributes: &'static [&'static str],
}

impl Projection {
    pub const fn new(attributes: &'static [&'static str]) -> Self {
        Self { attributes }
    }

    /// Render from `sources`, tried in order
    ///
    /// Attributes no source knows are rendered as `null`.
    pub fn render(&self, sources: &[&dyn AttributeSource]) -> Value {
        let mut body = Map::with_capacity(self.attributes.len());
        for name in self.attributes {
            let value = sources
                .iter()
                .find_map(|source| source.attribute(name))
                .map(AttributeValue::into_json)
                .unwrap_or(Value::Null);
            body.insert((*name).to_string(), value);
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize)]
    struct Record {
        id: String,
        name: String,
        tags: Vec<String>,
    }

    const DERIVED: &[(&str, Derivation<Record>)] = &[
        ("name", |record: &Record| format!("derived {}", record.name).into()),
        ("shout", |record: &Record| record.name.to_uppercase().into()),
        ("tag_count", |record: &Record| json!(record.tags.len()).into()),
    ];

    fn record() -> Record {
        Record {
            id: "1".to_string(),
            name: "alice".to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
        }
    }

    #[test]
    fn sources_are_tried_in_order() {
        let record = record();
        let fields = FieldSource::new(&record);
        let derived = DerivedSource::new(&record, DERIVED);
        let projection = Projection::new(&["id", "name", "shout", "tags", "missing"]);

        let body = projection.render(&[&fields, &derived]);

        assert_eq!(
            body,
            json!({
                "id": "1",
                "name": "alice",
                "shout": "ALICE",
                "tags": ["a", "b"],
                "missing": null
            })
        );

        let derived_first = projection.render(&[&derived, &fields]);
        assert_eq!(derived_first["name"], "derived alice");
    }

    #[test]
    fn deferred_values_are_evaluated_once_when_rendered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let value = AttributeValue::deferred(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            AttributeValue::collection(vec![
                AttributeValue::from("x"),
                AttributeValue::deferred(|| true.into()),
            ])
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(value.into_json(), json!(["x", true]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
