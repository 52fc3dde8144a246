//! Settings-driven connection supervisor
//!
//! Builds the provider for the configured backend, starts it, and replaces
//! it whenever the configuration changes and auto-reconnect is on. The
//! active provider is published on a `watch` channel so holders can follow
//! the swap.

use machlink_core::{EventBus, MachineMessage};
use machlink_settings::{Config, SettingsManager};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::any::AnyProvider;

/// Owner of the active provider
pub struct Supervisor {
    provider: watch::Sender<Arc<AnyProvider>>,
    events: Arc<EventBus>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Build and start the provider for the current settings, then follow
    /// settings changes.
    ///
    /// Fails when the initial provider cannot be built.
    pub fn start(settings: &SettingsManager, events: Arc<EventBus>) -> anyhow::Result<Self> {
        let provider = AnyProvider::from_config(&settings.current(), events.clone())?;
        Ok(Self::with_provider(settings, events, provider))
    }

    /// Start `provider` and follow settings changes from here on
    pub fn with_provider(
        settings: &SettingsManager,
        events: Arc<EventBus>,
        provider: AnyProvider,
    ) -> Self {
        let mut changes = settings.subscribe();
        let config = changes.borrow_and_update().clone();
        let provider = Arc::new(provider);
        provider.start_connection();
        tracing::info!(
            backend = %provider.kind(),
            host = %config.connection.host,
            "Supervisor started"
        );

        let (tx, _) = watch::channel(provider);
        let supervisor = Self {
            provider: tx,
            events,
            watcher: Mutex::new(None),
        };
        supervisor.spawn_watcher(changes);
        supervisor
    }

    fn spawn_watcher(&self, mut changes: watch::Receiver<Config>) {
        let provider = self.provider.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let config = changes.borrow_and_update().clone();
                if !config.connection.auto_reconnect {
                    tracing::info!("Configuration changed; auto-reconnect is off");
                    continue;
                }
                Self::swap(&provider, &config, &events).await;
            }
            tracing::debug!("Settings channel closed, supervisor watcher exiting");
        });
        if let Some(previous) = self.watcher.lock().replace(task) {
            previous.abort();
        }
    }

    async fn swap(
        provider: &watch::Sender<Arc<AnyProvider>>,
        config: &Config,
        events: &Arc<EventBus>,
    ) {
        match AnyProvider::from_config(config, events.clone()) {
            Ok(next) => {
                let next = Arc::new(next);
                let previous = provider.borrow().clone();
                previous.stop().await;
                next.start_connection();
                tracing::info!(
                    backend = %next.kind(),
                    host = %config.connection.host,
                    "Reconnecting with new settings"
                );
                provider.send_replace(next);
            }
            Err(e) => {
                tracing::error!("Keeping previous connection, new settings unusable: {:#}", e);
                events.message(MachineMessage::error(
                    config.connection.backend,
                    "Reconnect failed",
                    format!("{:#}", e),
                ));
            }
        }
    }

    /// The active provider
    pub fn provider(&self) -> Arc<AnyProvider> {
        self.provider.borrow().clone()
    }

    /// Provider swaps
    pub fn watch_provider(&self) -> watch::Receiver<Arc<AnyProvider>> {
        self.provider.subscribe()
    }

    /// Rebuild the provider from `config` now, regardless of auto-reconnect
    pub async fn reconnect(&self, config: &Config) {
        Self::swap(&self.provider, config, &self.events).await;
    }

    /// Stop following settings and shut the active provider down
    pub async fn stop(&self) {
        if let Some(task) = self.watcher.lock().take() {
            task.abort();
        }
        let current = self.provider();
        current.stop().await;
        tracing::info!("Supervisor stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(task) = self.watcher.lock().take() {
            task.abort();
        }
    }
}
