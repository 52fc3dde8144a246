//! Variable stores and the name-keyed registry behind them
//!
//! A backend store is a plain struct of typed [`Variable`] and [`Array`]
//! fields, built once. Alongside the typed fields it keeps a
//! [`VariableRegistry`] of type-erased [`VariableEntry`] handles, which the
//! memory buffer flattens into poll groups and the dynamic provider surface
//! uses for lookups by name or by array and unit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::access::MemoryAccess;
use crate::address::{Address, AddressRange};
use crate::array::Array;
use crate::error::StoreError;
use crate::priority::Priority;
use crate::value::{Value, ValueKind, VariableType};
use crate::variable::Variable;

/// Type-erased view of one variable
#[async_trait]
pub trait VariableEntry<A: Address>: Send + Sync {
    /// Unique variable name
    fn name(&self) -> &str;

    /// Unit or alias
    fn unit(&self) -> Option<&str>;

    /// Bound address; `None` for computed variables
    fn address(&self) -> Option<&A>;

    /// Poll priority
    fn priority(&self) -> Priority;

    /// Kind read back from the machine
    fn kind(&self) -> ValueKind;

    /// Kind accepted by writes
    fn write_kind(&self) -> ValueKind;

    /// Whether writes are rejected
    fn is_read_only(&self) -> bool;

    /// Cached value
    fn current_value(&self) -> Option<Value>;

    /// Replay-latest stream of the cached value
    fn observe_value(&self) -> watch::Receiver<Option<Value>>;

    /// Read and publish; `true` when a value came back
    async fn poll(&self, access: &dyn MemoryAccess<A>) -> bool;

    /// Read and publish, returning the value
    async fn read_value(&self, access: &dyn MemoryAccess<A>) -> Option<Value>;

    /// Write through without touching the cached value
    async fn send_value(&self, access: &dyn MemoryAccess<A>, value: Value) -> bool;
}

/// Shared handle to a registered variable
pub type EntryRef<A> = Arc<dyn VariableEntry<A>>;

/// Every variable of a store, in registration order
pub struct VariableRegistry<A: Address> {
    entries: Vec<EntryRef<A>>,
    by_name: HashMap<String, usize>,
    arrays: HashMap<String, Vec<usize>>,
}

impl<A: Address> VariableRegistry<A> {
    /// Start registering variables
    pub fn builder() -> RegistryBuilder<A> {
        RegistryBuilder {
            registry: VariableRegistry {
                entries: Vec::new(),
                by_name: HashMap::new(),
                arrays: HashMap::new(),
            },
        }
    }

    /// Number of registered variables, array slots included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in registration order
    pub fn entries(&self) -> &[EntryRef<A>] {
        &self.entries
    }

    /// Look up a variable (or array slot such as `axis[0]`) by name
    pub fn get(&self, name: &str) -> Option<&EntryRef<A>> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Look up an array slot by array name and unit
    pub fn element(&self, array: &str, unit: &str) -> Option<&EntryRef<A>> {
        self.arrays
            .get(array)?
            .iter()
            .map(|&i| &self.entries[i])
            .find(|entry| entry.unit() == Some(unit))
    }

    /// Resolve a name, or an array name plus unit
    pub fn resolve(&self, name: &str, unit: Option<&str>) -> Result<&EntryRef<A>, StoreError> {
        let found = match unit {
            Some(unit) => self.element(name, unit),
            None => self.get(name),
        };
        found.ok_or_else(|| StoreError::UnknownVariable {
            name: match unit {
                Some(unit) => format!("{}[{}]", name, unit),
                None => name.to_string(),
            },
        })
    }

    /// Names of registered arrays
    pub fn array_names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    /// Entries that the memory buffer polls
    pub fn polled(&self) -> impl Iterator<Item = &EntryRef<A>> {
        self.entries.iter().filter(|e| e.priority().is_polled())
    }

    /// Entries of one priority, in registration order
    pub fn by_priority(&self, priority: Priority) -> Vec<EntryRef<A>> {
        self.entries
            .iter()
            .filter(|e| e.priority() == priority)
            .cloned()
            .collect()
    }

    /// Smallest range covering every address accepted by `filter`
    pub fn address_range<F>(&self, filter: F) -> Option<AddressRange<A>>
    where
        F: Fn(&A) -> bool,
    {
        AddressRange::covering(
            self.entries
                .iter()
                .filter_map(|e| e.address())
                .filter(|a| filter(a)),
        )
    }
}

/// Collects variables into a [`VariableRegistry`], rejecting duplicates
pub struct RegistryBuilder<A: Address> {
    registry: VariableRegistry<A>,
}

impl<A: Address> RegistryBuilder<A> {
    fn push(&mut self, entry: EntryRef<A>) -> Result<usize, StoreError> {
        let name = entry.name().to_string();
        if self.registry.by_name.contains_key(&name) {
            return Err(StoreError::DuplicateName { name });
        }
        let index = self.registry.entries.len();
        self.registry.by_name.insert(name, index);
        self.registry.entries.push(entry);
        Ok(index)
    }

    /// Register a scalar variable
    pub fn variable<R, W>(&mut self, variable: &Variable<A, R, W>) -> Result<&mut Self, StoreError>
    where
        R: VariableType,
        W: VariableType,
    {
        self.push(Arc::new(variable.clone()))?;
        Ok(self)
    }

    /// Register every slot of an array
    pub fn array<R, W>(&mut self, array: &Array<A, R, W>) -> Result<&mut Self, StoreError>
    where
        R: VariableType,
        W: VariableType,
    {
        if self.registry.arrays.contains_key(array.name())
            || self.registry.by_name.contains_key(array.name())
        {
            return Err(StoreError::DuplicateName {
                name: array.name().to_string(),
            });
        }
        let mut slots = Vec::with_capacity(array.len());
        for element in array {
            slots.push(self.push(Arc::new(element.clone()))?);
        }
        self.registry.arrays.insert(array.name().to_string(), slots);
        Ok(self)
    }

    /// Finish registration
    pub fn build(self) -> VariableRegistry<A> {
        self.registry
    }
}

/// A backend's typed variable store
pub trait VariableStore: Send + Sync + 'static {
    /// Address kind of the backend
    type Address: Address;

    /// Name-keyed view of every field
    fn registry(&self) -> &VariableRegistry<Self::Address>;
}
