//! # Event Bus Module
//!
//! The message/log collaborator of the bridge. Providers publish structured
//! machine messages (protocol errors, resets, timeouts) and connection
//! lifecycle events; a display layer subscribes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use machlink_core::event_bus::{event_bus, EventCategory, EventFilter};
//!
//! let subscription = event_bus().subscribe(
//!     EventFilter::Categories(vec![EventCategory::Message]),
//!     |event| println!("{}", event.description()),
//! );
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
