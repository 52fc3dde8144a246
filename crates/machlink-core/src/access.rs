//! Raw memory access strategy
//!
//! The seam between the backend-agnostic model and a concrete backend.
//! Variables and the memory buffer only ever see this trait.

use async_trait::async_trait;

use crate::address::Address;
use crate::value::{Value, ValueKind};

/// Typed read/write primitives against one backend.
///
/// Implementations validate every response, log failures and return
/// `None`/`false`: transport errors never cross this boundary.
#[async_trait]
pub trait MemoryAccess<A: Address>: Send + Sync {
    /// Read the cell at `address`, decoded as `kind`
    async fn read(&self, address: &A, kind: ValueKind) -> Option<Value>;

    /// Write `value` to the cell at `address`
    async fn write(&self, address: &A, value: Value) -> bool;
}
