//! # machlink Communication
//!
//! Protocol backends for machlink: a stateful RPC-style CNC controller over
//! TCP and a stateless HTTP/REST firmware. Both plug into the core
//! [`ConnectionProvider`](machlink_core::ConnectionProvider); [`AnyProvider`]
//! hides which one is configured and [`Supervisor`] rebuilds it whenever the
//! settings change.

pub mod any;
pub mod rest;
pub mod rpc;
pub mod supervisor;

pub use any::AnyProvider;
pub use rest::{RestBackend, RestPhase, RestStore};
pub use rpc::{RpcBackend, RpcPhase, RpcStore};
pub use supervisor::Supervisor;
