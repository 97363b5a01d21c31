//! Database-level values and host scalar conversions.
//!
//! `Value` is what constants resolve to before rendering and what connection
//! adapters hand back for every column. `ScalarValue` maps host field types
//! onto it: enums collapse to their ordinal, custom value types to their
//! declared equivalent.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::DataError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Column type of a scalar property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

/// Hashable form of an identifier value, used to group rows and key caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdKey {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) => Some(ValueType::Int),
            Value::Float(_) => Some(ValueType::Float),
            Value::Text(_) => Some(ValueType::Text),
            Value::Bytes(_) => Some(ValueType::Bytes),
        }
    }

    /// Identifier key; `None` for NULL and for floats, which never identify rows.
    pub fn id_key(&self) -> Option<IdKey> {
        match self {
            Value::Int(i) => Some(IdKey::Int(*i)),
            Value::Bool(b) => Some(IdKey::Int(*b as i64)),
            Value::Text(s) => Some(IdKey::Text(s.clone())),
            Value::Bytes(b) => Some(IdKey::Bytes(b.clone())),
            Value::Null | Value::Float(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
        }
    }

    fn type_name(&self) -> String {
        match self.value_type() {
            Some(t) => format!("{:?}", t),
            None => "Null".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A host type stored in a single column.
pub trait ScalarValue: Clone + Default + fmt::Debug + 'static {
    const VALUE_TYPE: ValueType;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, DataError>;
}

fn mismatch(expected: ValueType, found: &Value) -> DataError {
    if found.is_null() {
        DataError::UnexpectedNull
    } else {
        DataError::TypeMismatch {
            expected,
            found: found.type_name(),
        }
    }
}

impl ScalarValue for i64 {
    const VALUE_TYPE: ValueType = ValueType::Int;

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: Value) -> Result<Self, DataError> {
        value.as_i64().ok_or_else(|| mismatch(ValueType::Int, &value))
    }
}

impl ScalarValue for i32 {
    const VALUE_TYPE: ValueType = ValueType::Int;

    fn to_value(&self) -> Value {
        Value::Int(*self as i64)
    }

    fn from_value(value: Value) -> Result<Self, DataError> {
        value
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .ok_or_else(|| mismatch(ValueType::Int, &value))
    }
}

impl ScalarValue for bool {
    const VALUE_TYPE: ValueType = ValueType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, DataError> {
        match value {
            Value::Bool(b) => Ok(b),
            // Engines without a boolean type hand back 0/1
            Value::Int(i) => Ok(i != 0),
            other => Err(mismatch(ValueType::Bool, &other)),
        }
    }
}

impl ScalarValue for f64 {
    const VALUE_TYPE: ValueType = ValueType::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, DataError> {
        value.as_f64().ok_or_else(|| mismatch(ValueType::Float, &value))
    }
}

impl ScalarValue for String {
    const VALUE_TYPE: ValueType = ValueType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, DataError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch(ValueType::Text, &other)),
        }
    }
}

impl ScalarValue for Vec<u8> {
    const VALUE_TYPE: ValueType = ValueType::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, DataError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch(ValueType::Bytes, &other)),
        }
    }
}

impl<T: ScalarValue> ScalarValue for Option<T> {
    const VALUE_TYPE: ValueType = T::VALUE_TYPE;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, DataError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Declares a fieldless enum stored as its ordinal.
///
/// The first variant is the default.
#[macro_export]
macro_rules! ordinal_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $first:ident $(, $rest:ident)* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis enum $name {
            #[default]
            $first,
            $($rest),*
        }

        impl $crate::model::ScalarValue for $name {
            const VALUE_TYPE: $crate::model::ValueType = $crate::model::ValueType::Int;

            fn to_value(&self) -> $crate::model::Value {
                $crate::model::Value::Int(*self as i64)
            }

            fn from_value(
                value: $crate::model::Value,
            ) -> ::std::result::Result<Self, $crate::model::DataError> {
                let ordinal = match value.as_i64() {
                    Some(ordinal) => ordinal,
                    None if value.is_null() => return Err($crate::model::DataError::UnexpectedNull),
                    None => {
                        return Err($crate::model::DataError::TypeMismatch {
                            expected: $crate::model::ValueType::Int,
                            found: format!("{:?}", value),
                        })
                    }
                };
                if ordinal == $name::$first as i64 {
                    return Ok($name::$first);
                }
                $(
                    if ordinal == $name::$rest as i64 {
                        return Ok($name::$rest);
                    }
                )*
                Err($crate::model::DataError::TypeMismatch {
                    expected: $crate::model::ValueType::Int,
                    found: format!("ordinal {} of {}", ordinal, stringify!($name)),
                })
            }
        }
    };
}
