//! Fixed-size arrays of variables laid out from one base address

use std::marker::PhantomData;

use crate::address::Address;
use crate::error::StoreError;
use crate::priority::Priority;
use crate::value::VariableType;
use crate::variable::Variable;

/// Ordered variables sharing a base address.
///
/// Slot `i` lives at `base.offset(i)`, so element order equals physical
/// address order. Every slot has a unit: either the custom unit given at
/// construction or its one-based index.
pub struct Array<A, R, W = R> {
    name: String,
    elements: Vec<Variable<A, R, W>>,
}

impl<A, R, W> Clone for Array<A, R, W> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            elements: self.elements.clone(),
        }
    }
}

impl<A: std::fmt::Debug, R: std::fmt::Debug, W> std::fmt::Debug for Array<A, R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Array")
            .field("name", &self.name)
            .field("elements", &self.elements)
            .finish()
    }
}

/// Builder for [`Array`]
pub struct ArrayBuilder<A, R, W> {
    name: String,
    base: A,
    size: usize,
    priority: Priority,
    units: Vec<String>,
    read_only: bool,
    _types: PhantomData<fn(R, W)>,
}

impl<A: Address, R: VariableType, W: VariableType> ArrayBuilder<A, R, W> {
    /// Poll priority shared by every slot
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Custom units for the leading slots
    pub fn units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.units = units.into_iter().map(Into::into).collect();
        self
    }

    /// Reject writes to every slot
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Lay out the slots
    pub fn build(self) -> Result<Array<A, R, W>, StoreError> {
        if self.size == 0 {
            return Err(StoreError::EmptyArray { array: self.name });
        }
        if self.units.len() > self.size {
            return Err(StoreError::TooManyUnits {
                array: self.name,
                units: self.units.len(),
                size: self.size,
            });
        }

        let units = resolve_units(&self.units, self.size);
        for (i, unit) in units.iter().enumerate() {
            if units[..i].contains(unit) {
                return Err(StoreError::DuplicateUnit {
                    array: self.name,
                    unit: unit.clone(),
                });
            }
        }

        let mut elements = Vec::with_capacity(self.size);
        let mut address = Some(self.base);
        for (index, unit) in units.into_iter().enumerate() {
            let Some(current) = address else {
                return Err(StoreError::AddressOverflow {
                    array: self.name,
                    index,
                });
            };
            address = current.increment();

            let mut builder = Variable::builder(format!("{}[{}]", self.name, index), current)
                .priority(self.priority)
                .unit(unit);
            if self.read_only {
                builder = builder.read_only();
            }
            elements.push(builder.build());
        }

        Ok(Array {
            name: self.name,
            elements,
        })
    }
}

/// Units for every slot; missing ones default to the one-based index
pub fn resolve_units(custom: &[String], size: usize) -> Vec<String> {
    (0..size)
        .map(|i| custom.get(i).cloned().unwrap_or_else(|| (i + 1).to_string()))
        .collect()
}

impl<A, R, W> Array<A, R, W>
where
    A: Address,
    R: VariableType,
    W: VariableType,
{
    /// Start an array of `size` slots at `base`
    pub fn builder(name: impl Into<String>, base: A, size: usize) -> ArrayBuilder<A, R, W> {
        ArrayBuilder {
            name: name.into(),
            base,
            size,
            priority: Priority::Medium,
            units: Vec::new(),
            read_only: false,
            _types: PhantomData,
        }
    }

    /// Array name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Arrays always have at least one slot
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Slot by index
    pub fn get(&self, index: usize) -> Option<&Variable<A, R, W>> {
        self.elements.get(index)
    }

    /// Slot by unit
    pub fn by_unit(&self, unit: &str) -> Option<&Variable<A, R, W>> {
        self.elements.iter().find(|v| v.unit() == Some(unit))
    }

    /// Index of the slot carrying `unit`
    pub fn index_of(&self, unit: &str) -> Option<usize> {
        self.elements.iter().position(|v| v.unit() == Some(unit))
    }

    /// Units in slot order
    pub fn units(&self) -> Vec<&str> {
        self.elements.iter().filter_map(|v| v.unit()).collect()
    }

    /// Slots in address order
    pub fn iter(&self) -> std::slice::Iter<'_, Variable<A, R, W>> {
        self.elements.iter()
    }

    /// Current value of every slot
    pub fn values(&self) -> Vec<Option<R>> {
        self.elements.iter().map(Variable::current).collect()
    }
}

impl<'a, A, R, W> IntoIterator for &'a Array<A, R, W> {
    type Item = &'a Variable<A, R, W>;
    type IntoIter = std::slice::Iter<'a, Variable<A, R, W>>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}
