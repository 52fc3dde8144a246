//! Persisted global variables
//!
//! Globals on the firmware vanish on reboot. The store declares which ones
//! must exist and their defaults; bring-up provisions missing ones by
//! running a generated macro whose every assignment is guarded by
//! `exists()`, so running it twice changes nothing.

use machlink_core::{Value, ValueKind};

/// A global that must exist, with its default value
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedDefault {
    /// Global name without the `global.` prefix
    pub name: String,
    /// Decoding kind of the global
    pub kind: ValueKind,
    /// Value assigned when the global is missing
    pub value: Value,
}

impl PersistedDefault {
    /// Declare a persisted global
    pub fn new(name: impl Into<String>, kind: ValueKind, value: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
        }
    }
}

/// Render a value as a firmware expression literal
pub fn literal(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Int(v) => Some(v.to_string()),
        Value::Float(v) if v.is_finite() => Some(format!("{:?}", v)),
        Value::Text(s) => Some(format!("\"{}\"", s.replace('"', "\"\""))),
        Value::Float(_) | Value::Pair(..) => None,
    }
}

/// Parse a default override from settings as `kind`
pub fn parse_default(text: &str, kind: ValueKind) -> Option<Value> {
    let text = text.trim();
    match kind {
        ValueKind::Bool => text.parse().ok().map(Value::Bool),
        ValueKind::Int16 | ValueKind::UInt16 | ValueKind::Int32 | ValueKind::UInt32 => {
            text.parse().ok().map(Value::Int)
        }
        ValueKind::Float64 => text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Value::Float),
        ValueKind::Text => Some(Value::Text(text.to_string())),
        ValueKind::Pair => None,
    }
}

/// Generate the provisioning macro
pub fn defaults_macro(defaults: &[PersistedDefault]) -> String {
    let mut content = String::from("; machlink persisted variable defaults\n");
    for default in defaults {
        let Some(value) = literal(&default.value) else {
            tracing::warn!(global = %default.name, "Default has no literal form, skipped");
            continue;
        };
        content.push_str(&format!(
            "if !exists(global.{name})\n  global {name} = {value}\n",
            name = default.name,
            value = value
        ));
    }
    content
}
