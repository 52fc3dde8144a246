//! Values crossing the adapter boundary
//!
//! Backends speak in [`Value`]s; variables are typed. [`VariableType`]
//! converts between the two with range checks, so a word that does not fit
//! the declared type reads as absent rather than as a wrapped number.

use serde::{Deserialize, Serialize};

/// How a backend should decode the cell behind an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Single bit / boolean
    Bool,
    /// Signed 16-bit word
    Int16,
    /// Unsigned 16-bit word
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// IEEE double
    Float64,
    /// Text
    Text,
    /// Composite current/target pair (only produced by derived variables)
    Pair,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int16 => "int16",
            ValueKind::UInt16 => "uint16",
            ValueKind::Int32 => "int32",
            ValueKind::UInt32 => "uint32",
            ValueKind::Float64 => "float64",
            ValueKind::Text => "text",
            ValueKind::Pair => "pair",
        };
        write!(f, "{}", name)
    }
}

/// Tagged union of every value a backend can produce or accept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Any integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
    /// Current/target pair
    Pair(f64, f64),
}

impl Value {
    /// Interpret as an integer, accepting integral floats
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Interpret as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Interpret as a boolean; integers are true when non-zero
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Convert from a JSON value, guided by the expected kind
    pub fn from_json(json: &serde_json::Value, kind: ValueKind) -> Option<Self> {
        match kind {
            ValueKind::Bool => json
                .as_bool()
                .or_else(|| json.as_i64().map(|v| v != 0))
                .map(Value::Bool),
            ValueKind::Int16 | ValueKind::UInt16 | ValueKind::Int32 | ValueKind::UInt32 => json
                .as_i64()
                .or_else(|| {
                    json.as_f64()
                        .filter(|v| v.fract() == 0.0)
                        .map(|v| v as i64)
                })
                .map(Value::Int),
            ValueKind::Float64 => json.as_f64().map(Value::Float),
            ValueKind::Text => match json {
                serde_json::Value::String(s) => Some(Value::Text(s.clone())),
                serde_json::Value::Null => None,
                other => Some(Value::Text(other.to_string())),
            },
            ValueKind::Pair => {
                let items = json.as_array()?;
                match items.as_slice() {
                    [a, b] => Some(Value::Pair(a.as_f64()?, b.as_f64()?)),
                    _ => None,
                }
            }
        }
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::from(*b),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Value::from(*v),
            Value::Text(s) => serde_json::Value::from(s.as_str()),
            Value::Pair(a, b) => serde_json::json!([a, b]),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "\"{}\"", s),
            Value::Pair(a, b) => write!(f, "{}/{}", a, b),
        }
    }
}

/// A Rust type that can be held by a variable
pub trait VariableType: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// How the backend should decode the cell
    const KIND: ValueKind;

    /// Convert from a backend value; `None` when it does not fit
    fn from_value(value: &Value) -> Option<Self>;

    /// Convert into a backend value
    fn into_value(self) -> Value;
}

impl VariableType for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

macro_rules! integer_variable_type {
    ($ty:ty, $kind:expr) => {
        impl VariableType for $ty {
            const KIND: ValueKind = $kind;

            fn from_value(value: &Value) -> Option<Self> {
                value.as_i64().and_then(|v| <$ty>::try_from(v).ok())
            }

            fn into_value(self) -> Value {
                Value::Int(i64::from(self))
            }
        }
    };
}

integer_variable_type!(i16, ValueKind::Int16);
integer_variable_type!(u16, ValueKind::UInt16);
integer_variable_type!(i32, ValueKind::Int32);
integer_variable_type!(u32, ValueKind::UInt32);

impl VariableType for f64 {
    const KIND: ValueKind = ValueKind::Float64;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl VariableType for String {
    const KIND: ValueKind = ValueKind::Text;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

/// Heater reading: current and target published as one value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    /// Measured temperature
    pub current: f64,
    /// Set point
    pub target: f64,
}

impl Temperature {
    /// Create a temperature pair
    pub fn new(current: f64, target: f64) -> Self {
        Self { current, target }
    }

    /// Whether the heater is within `tolerance` of its set point
    pub fn at_target(&self, tolerance: f64) -> bool {
        (self.current - self.target).abs() <= tolerance
    }
}

impl VariableType for Temperature {
    const KIND: ValueKind = ValueKind::Pair;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Pair(current, target) => Some(Self::new(*current, *target)),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Pair(self.current, self.target)
    }
}
