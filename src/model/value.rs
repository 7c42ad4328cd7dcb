//! Model values: the tagged union stored under each component key.
//!
//! Components published by programs take a handful of shapes: a scalar
//! reading, a position vector, a flag, a piece of text, a structured record,
//! an ordered list, or an opaque in-process handle (for example the
//! connection element owned by a program). [`ModelValue`] covers all of them
//! so the store never needs to know which program wrote what.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::error::ModelError;

/// A type-erased, reference-counted value shared through the store.
///
/// Handles compare by pointer identity: two handles are equal only when
/// they point at the same allocation.
#[derive(Clone)]
pub struct OpaqueHandle {
    value: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl OpaqueHandle {
    /// Wrap a value in a new handle.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Check if this handle holds a value of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Try to borrow the wrapped value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Name of the wrapped type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for OpaqueHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for OpaqueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueHandle<{}>", self.type_name)
    }
}

impl Serialize for OpaqueHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("<handle {}>", self.type_name))
    }
}

/// The value of a model component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ModelValue {
    /// A single number (a reading, a level, an angle).
    Scalar(f64),
    /// A boolean flag.
    Bool(bool),
    /// Free text.
    Text(String),
    /// A fixed-size numeric vector such as a position or a color.
    Vector(Vec<f64>),
    /// An ordered collection of values.
    List(Vec<ModelValue>),
    /// A structured record with named fields.
    Record(BTreeMap<String, ModelValue>),
    /// An in-process object that is shared but never serialized back in.
    #[serde(skip_deserializing)]
    Handle(OpaqueHandle),
}

impl ModelValue {
    /// Wrap an arbitrary value as an opaque handle.
    pub fn handle<T: Any + Send + Sync>(value: T) -> Self {
        ModelValue::Handle(OpaqueHandle::new(value))
    }

    /// Short name of the variant, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelValue::Scalar(_) => "scalar",
            ModelValue::Bool(_) => "bool",
            ModelValue::Text(_) => "text",
            ModelValue::Vector(_) => "vector",
            ModelValue::List(_) => "list",
            ModelValue::Record(_) => "record",
            ModelValue::Handle(_) => "handle",
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ModelValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ModelValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModelValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            ModelValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ModelValue]> {
        match self {
            ModelValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, ModelValue>> {
        match self {
            ModelValue::Record(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the value behind a handle as `T`.
    pub fn downcast_handle<T: Any>(&self) -> Option<&T> {
        match self {
            ModelValue::Handle(h) => h.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Convert a JSON value into a model value.
    ///
    /// Arrays made only of numbers become [`ModelValue::Vector`]; any other
    /// array becomes a [`ModelValue::List`]. `null` has no model
    /// representation and is rejected.
    pub fn from_json(value: Value) -> Result<Self, ModelError> {
        match value {
            Value::Null => Err(ModelError::UnsupportedValue("null".to_string())),
            Value::Bool(b) => Ok(ModelValue::Bool(b)),
            Value::Number(n) => n
                .as_f64()
                .map(ModelValue::Scalar)
                .ok_or_else(|| ModelError::UnsupportedValue(n.to_string())),
            Value::String(s) => Ok(ModelValue::Text(s)),
            Value::Array(items) => {
                if !items.is_empty() && items.iter().all(Value::is_number) {
                    Ok(ModelValue::Vector(
                        items.iter().filter_map(Value::as_f64).collect(),
                    ))
                } else {
                    items
                        .into_iter()
                        .map(ModelValue::from_json)
                        .collect::<Result<Vec<_>, _>>()
                        .map(ModelValue::List)
                }
            }
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| ModelValue::from_json(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(ModelValue::Record),
        }
    }
}

impl From<f64> for ModelValue {
    fn from(v: f64) -> Self {
        ModelValue::Scalar(v)
    }
}

impl From<i32> for ModelValue {
    fn from(v: i32) -> Self {
        ModelValue::Scalar(f64::from(v))
    }
}

impl From<bool> for ModelValue {
    fn from(v: bool) -> Self {
        ModelValue::Bool(v)
    }
}

impl From<&str> for ModelValue {
    fn from(v: &str) -> Self {
        ModelValue::Text(v.to_string())
    }
}

impl From<String> for ModelValue {
    fn from(v: String) -> Self {
        ModelValue::Text(v)
    }
}

impl From<Vec<f64>> for ModelValue {
    fn from(v: Vec<f64>) -> Self {
        ModelValue::Vector(v)
    }
}

impl From<Vec<ModelValue>> for ModelValue {
    fn from(v: Vec<ModelValue>) -> Self {
        ModelValue::List(v)
    }
}

impl From<BTreeMap<String, ModelValue>> for ModelValue {
    fn from(v: BTreeMap<String, ModelValue>) -> Self {
        ModelValue::Record(v)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn test_handle_downcast() {
        let value = ModelValue::handle(Marker(7));
        assert_eq!(value.kind(), "handle");
        assert_eq!(value.downcast_handle::<Marker>(), Some(&Marker(7)));
        assert!(value.downcast_handle::<String>().is_none());
    }

    #[test]
    fn test_handle_equality_is_identity() {
        let a = ModelValue::handle(Marker(1));
        let b = ModelValue::handle(Marker(1));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_json_shapes() {
        let v = ModelValue::from_json(serde_json::json!({
            "position": [1.0, 2.5],
            "label": "lamp",
            "on": true,
            "tags": ["a", 1],
        }))
        .unwrap();

        let record = v.as_record().unwrap();
        assert_eq!(record["position"].as_vector(), Some(&[1.0, 2.5][..]));
        assert_eq!(record["label"].as_text(), Some("lamp"));
        assert_eq!(record["on"].as_bool(), Some(true));
        assert_eq!(
            record["tags"],
            ModelValue::List(vec![ModelValue::Text("a".into()), ModelValue::Scalar(1.0)])
        );
    }

    #[test]
    fn test_from_json_rejects_null() {
        let err = ModelValue::from_json(serde_json::json!({"x": null})).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedValue(_)));
    }

    #[test]
    fn test_serialize_tagged() {
        let json = serde_json::to_value(ModelValue::Scalar(2.0)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "scalar", "value": 2.0}));

        let handle = serde_json::to_value(ModelValue::handle(Marker(3))).unwrap();
        assert!(handle["value"].as_str().unwrap().starts_with("<handle"));
    }

    #[test]
    fn test_deserialize_tagged() {
        let v: ModelValue =
            serde_json::from_value(serde_json::json!({"kind": "vector", "value": [0.0, 1.0]}))
                .unwrap();
        assert_eq!(v, ModelValue::Vector(vec![0.0, 1.0]));
    }
}
