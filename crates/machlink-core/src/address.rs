//! Protocol address abstraction
//!
//! An address identifies one memory cell on the machine. Concrete address
//! kinds live with their backend; the core only needs ordering (for range
//! discovery and array layout) and a pure successor function.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// A protocol-specific memory location.
///
/// Distinct addresses of one kind denote disjoint storage. `increment`
/// must be pure and injective: repeated increments from any start yield
/// strictly increasing addresses until the address space is exhausted,
/// at which point it returns `None`.
pub trait Address: Clone + Debug + Display + Eq + Ord + Hash + Send + Sync + 'static {
    /// The next cell in physical layout order, if any
    fn increment(&self) -> Option<Self>;

    /// The address `steps` cells after this one
    fn offset(&self, steps: usize) -> Option<Self> {
        let mut current = self.clone();
        for _ in 0..steps {
            current = current.increment()?;
        }
        Some(current)
    }
}

/// Inclusive range of addresses, produced by range discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange<A> {
    /// Lowest address in use
    pub start: A,
    /// Highest address in use
    pub end: A,
}

impl<A: Address> AddressRange<A> {
    /// Smallest range covering every address yielded, or `None` when empty
    pub fn covering<'a, I>(addresses: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a A>,
    {
        let mut iter = addresses.into_iter();
        let first = iter.next()?;
        let (start, end) = iter.fold((first, first), |(lo, hi), a| {
            (if a < lo { a } else { lo }, if a > hi { a } else { hi })
        });
        Some(Self {
            start: start.clone(),
            end: end.clone(),
        })
    }

    /// Check whether an address falls inside the range
    pub fn contains(&self, address: &A) -> bool {
        *address >= self.start && *address <= self.end
    }
}
