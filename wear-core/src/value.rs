//! Payload values: loosely-typed values handed over by the application runtime, and the
//! closed set of typed values that survive transport.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CodecError;

/// Application-side map of dynamic values.
pub type DynamicMap = BTreeMap<String, Dynamic>;

/// Value as received from the application runtime, before any type policy is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamic {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    List(Vec<Dynamic>),
    Map(DynamicMap),
}

impl Dynamic {
    pub fn type_name(&self) -> &'static str {
        match self {
            Dynamic::Null => "null",
            Dynamic::Bool(_) => "bool",
            Dynamic::Int(_) => "int",
            Dynamic::Long(_) => "long",
            Dynamic::Float(_) => "float",
            Dynamic::Double(_) => "double",
            Dynamic::String(_) => "string",
            Dynamic::List(_) => "list",
            Dynamic::Map(_) => "map",
        }
    }

    /// Integer view (Int or Long). Used for listener ids.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Dynamic::Int(v) => Some(i64::from(*v)),
            Dynamic::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Dynamic::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&DynamicMap> {
        match self {
            Dynamic::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Dynamic {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Dynamic::Null,
            serde_json::Value::Bool(b) => Dynamic::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => Dynamic::Int(small),
                        Err(_) => Dynamic::Long(i),
                    }
                } else {
                    // u64 above i64::MAX or a fractional number.
                    Dynamic::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Dynamic::String(s),
            serde_json::Value::Array(items) => {
                Dynamic::List(items.into_iter().map(Dynamic::from).collect())
            }
            serde_json::Value::Object(map) => {
                Dynamic::Map(map.into_iter().map(|(k, v)| (k, Dynamic::from(v))).collect())
            }
        }
    }
}

impl From<&Dynamic> for serde_json::Value {
    fn from(value: &Dynamic) -> Self {
        match value {
            Dynamic::Null => serde_json::Value::Null,
            Dynamic::Bool(b) => serde_json::Value::Bool(*b),
            Dynamic::Int(v) => serde_json::Value::from(*v),
            Dynamic::Long(v) => serde_json::Value::from(*v),
            Dynamic::Float(v) => serde_json::Value::from(f64::from(*v)),
            Dynamic::Double(v) => serde_json::Value::from(*v),
            Dynamic::String(s) => serde_json::Value::String(s.clone()),
            Dynamic::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Dynamic::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Typed payload value. Serialized externally tagged, so every value carries its own type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    StringArray(Vec<String>),
    Int64Array(Vec<i64>),
    Float64Array(Vec<f64>),
}

impl Value {
    /// Apply the transport type policy to one application value.
    ///
    /// `Ok(None)` means the value contributes nothing (empty list). `Err` means the key
    /// must be dropped: unsupported scalar, non-homogeneous or unsupported array, or a
    /// float that cannot be represented on the wire.
    pub fn from_dynamic(value: &Dynamic) -> Result<Option<Value>, CodecError> {
        let converted = match value {
            Dynamic::String(s) => Value::String(s.clone()),
            Dynamic::Int(v) => Value::Int64(i64::from(*v)),
            Dynamic::Long(v) => Value::Int64(*v),
            Dynamic::Float(v) => Value::Float64(f64::from(*v)),
            Dynamic::Double(v) => Value::Float64(*v),
            Dynamic::Bool(b) => Value::Boolean(*b),
            Dynamic::List(items) => match array_from_dynamic(items)? {
                Some(array) => array,
                None => return Ok(None),
            },
            other => return Err(CodecError::UnsupportedType(other.type_name())),
        };
        if !converted.is_finite() {
            return Err(CodecError::NonFinite);
        }
        Ok(Some(converted))
    }

    /// False if any float in the value is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float64(v) => v.is_finite(),
            Value::Float64Array(items) => items.iter().all(|v| v.is_finite()),
            _ => true,
        }
    }

    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            Value::String(s) => Dynamic::String(s.clone()),
            Value::Int64(v) => Dynamic::Long(*v),
            Value::Float64(v) => Dynamic::Double(*v),
            Value::Boolean(b) => Dynamic::Bool(*b),
            Value::StringArray(items) => {
                Dynamic::List(items.iter().cloned().map(Dynamic::String).collect())
            }
            Value::Int64Array(items) => Dynamic::List(items.iter().copied().map(Dynamic::Long).collect()),
            Value::Float64Array(items) => {
                Dynamic::List(items.iter().copied().map(Dynamic::Double).collect())
            }
        }
    }
}

/// The first element picks the array kind; every other element must be the same kind.
fn array_from_dynamic(items: &[Dynamic]) -> Result<Option<Value>, CodecError> {
    let Some(first) = items.first() else {
        return Ok(None);
    };
    let array = match first {
        Dynamic::Int(_) => uniform(items, |d| match d {
            Dynamic::Int(v) => Some(i64::from(*v)),
            _ => None,
        })
        .map(Value::Int64Array),
        Dynamic::Long(_) => uniform(items, |d| match d {
            Dynamic::Long(v) => Some(*v),
            _ => None,
        })
        .map(Value::Int64Array),
        Dynamic::String(_) => uniform(items, |d| match d {
            Dynamic::String(s) => Some(s.clone()),
            _ => None,
        })
        .map(Value::StringArray),
        Dynamic::Float(_) => uniform(items, |d| match d {
            Dynamic::Float(v) => Some(f64::from(*v)),
            _ => None,
        })
        .map(Value::Float64Array),
        Dynamic::Double(_) => uniform(items, |d| match d {
            Dynamic::Double(v) => Some(*v),
            _ => None,
        })
        .map(Value::Float64Array),
        other => return Err(CodecError::UnsupportedElement(other.type_name())),
    };
    array.map(Some).ok_or(CodecError::MixedArray)
}

fn uniform<T>(items: &[Dynamic], pick: impl Fn(&Dynamic) -> Option<T>) -> Option<Vec<T>> {
    items.iter().map(pick).collect()
}

/// Typed key-value payload. Keys are kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert an application map, dropping (and logging) every entry the type policy rejects.
    pub fn from_dynamic(map: &DynamicMap) -> Self {
        let mut payload = Payload::new();
        for (key, value) in map {
            match Value::from_dynamic(value) {
                Ok(Some(v)) => {
                    payload.insert(key.clone(), v);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(key = %key, error = %e, "could not translate value; dropping key");
                }
            }
        }
        payload
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_dynamic(&self) -> DynamicMap {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_dynamic()))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Payload(iter.into_iter().collect())
    }
}
