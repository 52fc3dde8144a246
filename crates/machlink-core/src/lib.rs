//! # machlink Core
//!
//! Backend-agnostic machinery for bridging a controller application with a
//! physical machine: addresses, typed observable variables and arrays,
//! variable stores, the multi-frequency memory buffer, and the connection
//! provider that drives a backend's bring-up phases.

pub mod access;
pub mod address;
pub mod array;
pub mod error;
pub mod event_bus;
pub mod memory_buffer;
pub mod phase;
pub mod priority;
pub mod provider;
pub mod store;
pub mod value;
pub mod variable;
pub mod wait;

pub use access::MemoryAccess;
pub use address::{Address, AddressRange};
pub use array::{Array, ArrayBuilder};
pub use error::{ConnectionError, Error, ProtocolError, Result, StoreError};

// Re-export event bus for convenience
pub use event_bus::{
    event_bus, AppEvent, ConnectionEvent, EventBus, EventBusConfig, EventCategory, EventFilter,
    MachineMessage, Severity, SubscriptionId,
};

pub use memory_buffer::{BulkBuffer, MemoryBuffer};
pub use phase::{ConnectionPhase, PhaseMachine, RetryPolicy, StepOutcome, Transition};
pub use priority::{PollPeriods, Priority};
pub use provider::{Backend, BackendKind, BackendTuning, ConnectionProvider, StepContext};
pub use store::{EntryRef, RegistryBuilder, VariableEntry, VariableRegistry, VariableStore};
pub use value::{Temperature, Value, ValueKind, VariableType};
pub use variable::{Variable, VariableBuilder};
pub use wait::{try_wait_until, wait_until};
