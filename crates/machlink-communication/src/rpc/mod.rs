//! Stateful RPC-style CNC controller backend
//!
//! Talks newline-delimited JSON over one TCP session. Memory is split into
//! a bit-addressable word area and a double area; both are mirrored by bulk
//! blocks covering exactly the indices the store registers.

pub mod address;
pub mod backend;
pub mod bulk;
pub mod connection;
pub mod protocol;
pub mod store;
pub mod transport;

pub use address::{Area, RpcAddress};
pub use backend::{RpcBackend, RpcPhase};
pub use bulk::{BlockCache, CachedAccess};
pub use connection::RpcConnection;
pub use protocol::{Method, Request, Response, RpcError, Status, SystemState, SystemStatus};
pub use store::RpcStore;
pub use transport::{RpcTransport, TcpTransport};
