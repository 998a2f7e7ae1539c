//! Resource value representation.
//!
//! Values are stored as [`serde_json::Value`], a closed set of primitive and
//! structured kinds. [`ValueType`] is the schema-side descriptor of which kind
//! a resource is expected to hold.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A resource value.
pub type Value = serde_json::Value;

/// Declared value type of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Accepts any value.
    #[default]
    Any,
    Boolean,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ValueType {
    /// Infers the value type of a concrete value.
    ///
    /// `null` has no meaningful type and maps to [`ValueType::Any`].
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Any,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Float,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns true if `value` can be stored in a resource of this type.
    ///
    /// Integers are accepted where floats are declared.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, Self::of(value)) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Float, Self::Integer) => true,
            (declared, actual) => *declared == actual,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "boolean" | "bool" => Ok(Self::Boolean),
            "integer" | "int" | "long" => Ok(Self::Integer),
            "float" | "double" => Ok(Self::Float),
            "string" => Ok(Self::String),
            "array" | "list" => Ok(Self::Array),
            "object" | "map" => Ok(Self::Object),
            other => Err(crate::Error::UnknownValueType(other.to_string())),
        }
    }
}
