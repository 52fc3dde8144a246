//! REST firmware addresses
//!
//! An address is a path into the firmware's object model: a key fetched
//! with one `rr_model` request, an optional index into the array at that
//! key and an optional dotted field inside the selected element.

use machlink_core::Address;
use serde_json::Value as Json;
use std::fmt;

const GLOBAL_PREFIX: &str = "global.";

/// Path into the object model
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RestAddress {
    key: String,
    index: Option<u32>,
    field: Option<String>,
}

impl RestAddress {
    /// The value at `key`
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            index: None,
            field: None,
        }
    }

    /// `field` of element `index` of the array at `key`
    pub fn indexed(key: impl Into<String>, index: u32, field: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            index: Some(index),
            field: Some(field.into()),
        }
    }

    /// User global variable `name`
    pub fn global(name: &str) -> Self {
        Self::key(format!("{}{}", GLOBAL_PREFIX, name))
    }

    /// Object model key fetched for this address
    pub fn model_key(&self) -> &str {
        &self.key
    }

    /// Array index, if any
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Field path, if any
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Global variable name when this addresses a plain global
    pub fn global_name(&self) -> Option<&str> {
        let name = self.key.strip_prefix(GLOBAL_PREFIX)?;
        (!name.is_empty() && !name.contains('.')).then_some(name)
    }

    /// Whether this addresses a user global
    pub fn is_global(&self) -> bool {
        self.global_name().is_some()
    }

    /// Select this address's value out of the value fetched for its key
    pub fn select<'a>(&self, root: &'a Json) -> Option<&'a Json> {
        let mut node = match self.index {
            Some(index) => root.as_array()?.get(usize::try_from(index).ok()?)?,
            None => root,
        };
        if let Some(field) = &self.field {
            for part in field.split('.') {
                node = node.as_object()?.get(part)?;
            }
        }
        Some(node)
    }
}

impl fmt::Display for RestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if let Some(index) = self.index {
            write!(f, "[{}]", index)?;
        }
        if let Some(field) = &self.field {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

impl Address for RestAddress {
    /// Next array element; plain keys have no successor
    fn increment(&self) -> Option<Self> {
        let index = self.index?.checked_add(1)?;
        Some(Self {
            key: self.key.clone(),
            index: Some(index),
            field: self.field.clone(),
        })
    }
}
