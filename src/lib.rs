//! # machlink
//!
//! Unified variable access for CNC controllers and 3D-printer firmware.
//!
//! A [`ConnectionProvider`] brings a machine online through a phase machine,
//! keeps a typed variable store fresh through a priority-scheduled memory
//! buffer, and exposes live reads and writes once bring-up is done. Two
//! backends ship with the workspace:
//!
//! - **RPC**: JSON-RPC over TCP to a CNC controller's word/bit/double memory
//! - **REST**: HTTP to printer firmware's object model and global variables
//!
//! ## Workspace
//!
//! 1. **machlink-core**: variable model, memory buffer, phase machine, provider, event bus
//! 2. **machlink-communication**: RPC and REST backends, backend-agnostic provider, supervisor
//! 3. **machlink-settings**: TOML configuration and its manager

pub use machlink_communication::{
    AnyProvider, RestBackend, RestPhase, RestStore, RpcBackend, RpcPhase, RpcStore, Supervisor,
};
pub use machlink_core::{
    AppEvent, BackendKind, BackendTuning, ConnectionEvent, ConnectionPhase, ConnectionProvider,
    EventBus, MachineMessage, Severity, Value, VariableEntry, VariableStore,
};
pub use machlink_settings::{Config, SettingsManager};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date information
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with structured output.
///
/// Honors `RUST_LOG`; falls back to `info`. Set `MACHLINK_LOG_FORMAT=json`
/// for one JSON object per line.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("MACHLINK_LOG_FORMAT").is_ok_and(|format| format == "json");
    if json {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Log a bus event at the level matching its severity
pub fn log_event(event: &AppEvent) {
    match event {
        AppEvent::Message(message) => match message.severity {
            Severity::Info => tracing::info!(source = %message.source, "{}", event.description()),
            Severity::Warning => {
                tracing::warn!(source = %message.source, "{}", event.description())
            }
            Severity::Error => tracing::error!(source = %message.source, "{}", event.description()),
        },
        AppEvent::Connection(_) => tracing::info!("{}", event.description()),
    }
}
