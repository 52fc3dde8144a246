//! Stateless HTTP/REST firmware backend
//!
//! Every read is an object model query (`rr_model`), every write a
//! `set global.<name>` G-code. Sessions are opened with `rr_connect`;
//! persisted globals are provisioned by a generated macro on first contact.

pub mod address;
pub mod backend;
pub mod bulk;
pub mod connection;
pub mod persisted;
pub mod store;
pub mod transport;

pub use address::RestAddress;
pub use backend::{RestBackend, RestPhase};
pub use bulk::{CachedAccess, GlobalsBlock};
pub use connection::RestConnection;
pub use persisted::{defaults_macro, PersistedDefault};
pub use store::RestStore;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
