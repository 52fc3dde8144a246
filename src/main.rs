use machlink::{init_logging, log_event, EventBus, SettingsManager, Supervisor, BUILD_DATE, VERSION};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    tracing::info!(version = VERSION, built = BUILD_DATE, "machlink starting");

    let settings = match SettingsManager::open_default() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Falling back to default settings: {}", e);
            SettingsManager::default()
        }
    };

    let events = Arc::new(EventBus::new());
    let mut rx = events.receiver();
    let supervisor = Supervisor::start(&settings, events)?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    supervisor.stop().await;
    Ok(())
}
