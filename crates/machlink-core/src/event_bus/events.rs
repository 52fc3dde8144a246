//! Event type definitions for the event bus.
//!
//! Two families of events travel on the bus: structured machine messages
//! (the records a message/log display consumes) and connection lifecycle
//! events emitted by the bring-up machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::BackendKind;

/// Root event enum for all bridge events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    /// Structured diagnostic record
    Message(MachineMessage),
    /// Bring-up lifecycle
    Connection(ConnectionEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Message(_) => EventCategory::Message,
            AppEvent::Connection(_) => EventCategory::Connection,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Message(m) => m.description(),
            AppEvent::Connection(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Machine messages.
    Message,
    /// Connection lifecycle events.
    Connection,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Message => write!(f, "Message"),
            EventCategory::Connection => write!(f, "Connection"),
        }
    }
}

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational
    Info,
    /// Recoverable problem
    Warning,
    /// Failed operation
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A structured message for the message/log display.
///
/// Every protocol error, reset and timeout produces one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineMessage {
    /// Backend that produced the message
    pub source: BackendKind,
    /// Short title
    pub title: String,
    /// Detail text
    pub body: String,
    /// Severity level
    pub severity: Severity,
    /// Backend error code, when there is one
    pub code: Option<i64>,
    /// When the message was raised
    pub timestamp: DateTime<Utc>,
}

impl MachineMessage {
    /// Create a message stamped with the current time
    pub fn new(
        source: BackendKind,
        severity: Severity,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source,
            title: title.into(),
            body: body.into(),
            severity,
            code: None,
            timestamp: Utc::now(),
        }
    }

    /// Informational message
    pub fn info(source: BackendKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(source, Severity::Info, title, body)
    }

    /// Warning message
    pub fn warning(source: BackendKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(source, Severity::Warning, title, body)
    }

    /// Error message
    pub fn error(source: BackendKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(source, Severity::Error, title, body)
    }

    /// Attach a backend error code
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    fn description(&self) -> String {
        match self.code {
            Some(code) => format!(
                "[{}] {} ({}): {} (code {})",
                self.source, self.title, self.severity, self.body, code
            ),
            None => format!(
                "[{}] {} ({}): {}",
                self.source, self.title, self.severity, self.body
            ),
        }
    }
}

/// Connection lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// The phase machine was (re)started.
    Started {
        /// Backend kind.
        backend: BackendKind,
    },
    /// The phase machine advanced.
    PhaseChanged {
        /// Backend kind.
        backend: BackendKind,
        /// Name of the new phase.
        phase: String,
        /// Progress in 0..=1.
        progress: f64,
    },
    /// A failure sent the machine back to the initial phase.
    Restarted {
        /// Backend kind.
        backend: BackendKind,
        /// Phase that failed.
        from_phase: String,
        /// Why it failed.
        reason: String,
    },
    /// Every registered variable and bulk buffer has been read once.
    FullMemoryRead {
        /// Backend kind.
        backend: BackendKind,
    },
    /// The terminal phase was reached.
    Ready {
        /// Backend kind.
        backend: BackendKind,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Started { backend } => format!("[{}] Connection started", backend),
            ConnectionEvent::PhaseChanged {
                backend,
                phase,
                progress,
            } => format!(
                "[{}] Phase {} ({:.0}%)",
                backend,
                phase,
                progress * 100.0
            ),
            ConnectionEvent::Restarted {
                backend,
                from_phase,
                reason,
            } => format!("[{}] Restarted from {}: {}", backend, from_phase, reason),
            ConnectionEvent::FullMemoryRead { backend } => {
                format!("[{}] Full memory read", backend)
            }
            ConnectionEvent::Ready { backend } => format!("[{}] Ready", backend),
        }
    }
}
