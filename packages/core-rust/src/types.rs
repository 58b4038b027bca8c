use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Generic runtime value threaded through the invocation pipeline.
///
/// Arguments, execution contexts, handler results and configuration
/// attributes are all carried as `Value`. `Null` is the "no value" marker:
/// a stage that produces nothing returns `Value::Null`.
///
/// Serializes untagged so declared-type schemas can carry plain JSON
/// attribute values. Variant order matters for deserialization: arrays are
/// tried before `Bytes`, and `Object` before `Map`.
///
/// The JSON form is therefore lossy: `Bytes` reads back as an `Array` of
/// `Int`s, and a `Map` whose only keys are `type_name` and `fields` (with
/// matching shapes) reads back as an `Object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// The absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Instance of a named type (a bean-like execution context, for example).
    /// The dependency container injects members into `fields`.
    Object {
        type_name: String,
        fields: BTreeMap<String, Value>,
    },
    /// String-keyed map. Uses `BTreeMap` for deterministic ordering.
    Map(BTreeMap<String, Value>),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Creates an empty instance of the named type.
    #[must_use]
    pub fn object(type_name: impl Into<String>) -> Self {
        Self::Object {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a field of an `Object` or an entry of a `Map`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Object { fields, .. } | Self::Map(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Sets a field of an `Object` or an entry of a `Map`.
    ///
    /// Returns `false` (and leaves the value untouched) for any other variant.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> bool {
        match self {
            Self::Object { fields, .. } | Self::Map(fields) => {
                fields.insert(name.into(), value);
                true
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
