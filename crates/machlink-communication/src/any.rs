//! Backend-agnostic provider
//!
//! [`AnyProvider`] wraps whichever backend the configuration selects and
//! exposes the name-keyed surface both share. Typed access stays available
//! through [`AnyProvider::as_rpc`] and [`AnyProvider::as_rest`].

use machlink_core::{
    BackendKind, ConnectionPhase, ConnectionProvider, EventBus, Value, VariableStore,
};
use machlink_settings::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::rest::RestBackend;
use crate::rpc::RpcBackend;

/// Provider for the configured backend
pub enum AnyProvider {
    /// RPC controller
    Rpc(ConnectionProvider<RpcBackend>),
    /// REST firmware
    Rest(ConnectionProvider<RestBackend>),
}

macro_rules! dispatch {
    ($self:expr, $provider:ident => $body:expr) => {
        match $self {
            AnyProvider::Rpc($provider) => $body,
            AnyProvider::Rest($provider) => $body,
        }
    };
}

impl AnyProvider {
    /// Build the provider for `config.connection.backend`; nothing runs yet
    pub fn from_config(config: &Config, events: Arc<EventBus>) -> anyhow::Result<Self> {
        let provider = match config.connection.backend {
            BackendKind::Rpc => {
                let backend = RpcBackend::from_config(config, events.clone())?;
                AnyProvider::Rpc(ConnectionProvider::new(backend, events))
            }
            BackendKind::Rest => {
                let backend = RestBackend::from_config(config, events.clone())?;
                AnyProvider::Rest(ConnectionProvider::new(backend, events))
            }
        };
        tracing::debug!(
            backend = %provider.kind(),
            host = %config.connection.host,
            port = config.connection.effective_port(),
            "Provider built"
        );
        Ok(provider)
    }

    /// Backend kind
    pub fn kind(&self) -> BackendKind {
        dispatch!(self, p => p.kind())
    }

    /// The RPC provider, if that is the configured backend
    pub fn as_rpc(&self) -> Option<&ConnectionProvider<RpcBackend>> {
        match self {
            AnyProvider::Rpc(p) => Some(p),
            AnyProvider::Rest(_) => None,
        }
    }

    /// The REST provider, if that is the configured backend
    pub fn as_rest(&self) -> Option<&ConnectionProvider<RestBackend>> {
        match self {
            AnyProvider::Rest(p) => Some(p),
            AnyProvider::Rpc(_) => None,
        }
    }

    /// (Re)start bring-up
    pub fn start_connection(&self) {
        dispatch!(self, p => p.start_connection())
    }

    /// Re-run initialization over the open transport
    pub fn initialize(&self) {
        dispatch!(self, p => p.initialize())
    }

    /// Abort bring-up and polling, then close the session
    pub async fn stop(&self) {
        dispatch!(self, p => p.stop().await)
    }

    /// Display name of the current phase
    pub fn phase_name(&self) -> String {
        dispatch!(self, p => p.phase().to_string())
    }

    /// Phase changes, as display names
    pub fn watch_phase_name(&self) -> watch::Receiver<String> {
        let (tx, rx) = watch::channel(self.phase_name());
        fn forward<P: ConnectionPhase>(mut phases: watch::Receiver<P>, tx: watch::Sender<String>) {
            tokio::spawn(async move {
                while phases.changed().await.is_ok() {
                    let name = phases.borrow_and_update().to_string();
                    if tx.send(name).is_err() {
                        break;
                    }
                }
            });
        }
        dispatch!(self, p => forward(p.watch_phase(), tx));
        rx
    }

    /// Whether the transport or session is being opened
    pub fn is_connecting(&self) -> bool {
        dispatch!(self, p => p.is_connecting())
    }

    /// Whether the machine is being initialized
    pub fn is_initializing(&self) -> bool {
        dispatch!(self, p => p.is_initializing())
    }

    /// Whether bring-up is complete
    pub fn is_ready(&self) -> bool {
        dispatch!(self, p => p.is_ready())
    }

    /// Bring-up progress in `0.0..=1.0`
    pub fn connection_progress(&self) -> f64 {
        dispatch!(self, p => p.connection_progress())
    }

    /// Wait for the terminal phase, up to `limit`
    pub async fn wait_ready(&self, limit: Duration) -> bool {
        dispatch!(self, p => p.wait_ready(limit).await)
    }

    /// Every registered variable name, array elements included
    pub fn variable_names(&self) -> Vec<String> {
        dispatch!(self, p => p
            .store()
            .registry()
            .entries()
            .iter()
            .map(|entry| entry.name().to_string())
            .collect())
    }

    /// Live read by name, or array name plus unit
    pub async fn read(&self, name: &str, unit: Option<&str>) -> Option<Value> {
        dispatch!(self, p => p.read_named(name, unit).await)
    }

    /// Write through by name, or array name plus unit
    pub async fn write(&self, name: &str, unit: Option<&str>, value: Value) -> bool {
        dispatch!(self, p => p.write_named(name, unit, value).await)
    }

    /// Negate a boolean by name
    pub async fn toggle(&self, name: &str, unit: Option<&str>) -> bool {
        dispatch!(self, p => p.toggle_named(name, unit).await)
    }

    /// Replay-latest stream of the cached value; `None` for unknown names
    pub fn observe(&self, name: &str, unit: Option<&str>) -> Option<watch::Receiver<Option<Value>>> {
        dispatch!(self, p => p.observe_named(name, unit))
    }

    /// Last cached value
    pub fn current(&self, name: &str, unit: Option<&str>) -> Option<Value> {
        dispatch!(self, p => p
            .store()
            .registry()
            .resolve(name, unit)
            .ok()?
            .current_value())
    }

    /// Reference every axis and wait for completion
    pub async fn home_axes(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        dispatch!(self, p => p.backend().home_axes().await)
    }

    /// Start or resume the active program
    pub async fn cycle_start(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        dispatch!(self, p => p.backend().cycle_start().await)
    }

    /// Stop the active program
    pub async fn cycle_stop(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        dispatch!(self, p => p.backend().cycle_stop().await)
    }

    /// Pause motion
    pub async fn feed_hold(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        dispatch!(self, p => p.backend().feed_hold().await)
    }
}
