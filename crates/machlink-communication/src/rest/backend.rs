//! REST firmware backend
//!
//! Bring-up: check that the web server answers, drop any stale session,
//! open a new one, read the machine status, provision missing persisted
//! globals and wait for the first full memory read.

use async_trait::async_trait;
use machlink_core::{
    wait_until, Backend, BackendKind, BackendTuning, BulkBuffer, ConnectionPhase, EventBus,
    MemoryAccess, StepContext, StepOutcome, StoreError, VariableStore,
};
use machlink_settings::{Config, RestSettings};
use serde_json::Value as Json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::address::RestAddress;
use super::bulk::{CachedAccess, GlobalsBlock};
use super::connection::RestConnection;
use super::persisted::defaults_macro;
use super::store::RestStore;
use super::transport::{HttpTransport, ReqwestTransport};

/// Bring-up phases of the REST firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestPhase {
    /// Check that the web server answers
    ConnectTransport,
    /// Drop a session left over from an earlier run
    DisconnectStaleSession,
    /// Open a session
    ConnectSession,
    /// Read the machine status
    ReadStatus,
    /// Create missing persisted globals
    InitializeVariables,
    /// Wait for the memory buffer's full-read latch
    WaitFullMemoryRead,
    /// Operational
    Done,
}

impl fmt::Display for RestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestPhase::ConnectTransport => "connect transport",
            RestPhase::DisconnectStaleSession => "disconnect stale session",
            RestPhase::ConnectSession => "connect session",
            RestPhase::ReadStatus => "read status",
            RestPhase::InitializeVariables => "initialize variables",
            RestPhase::WaitFullMemoryRead => "wait full memory read",
            RestPhase::Done => "done",
        };
        f.write_str(name)
    }
}

impl ConnectionPhase for RestPhase {
    const ALL: &'static [Self] = &[
        RestPhase::ConnectTransport,
        RestPhase::DisconnectStaleSession,
        RestPhase::ConnectSession,
        RestPhase::ReadStatus,
        RestPhase::InitializeVariables,
        RestPhase::WaitFullMemoryRead,
        RestPhase::Done,
    ];
    const INITIALIZING: Self = RestPhase::ReadStatus;
}

/// Transport, store and bring-up of one REST firmware
pub struct RestBackend {
    connection: Arc<RestConnection>,
    store: RestStore,
    globals: Option<Arc<GlobalsBlock>>,
    settings: RestSettings,
    tuning: BackendTuning,
    provisioned: AtomicBool,
}

impl RestBackend {
    /// Directory the provisioning macro lives in
    pub const SYSTEM_DIR: &'static str = "0:/sys";

    /// Assemble a backend over `transport`
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        password: impl Into<String>,
        settings: RestSettings,
        tuning: BackendTuning,
        events: Arc<EventBus>,
    ) -> Result<Self, StoreError> {
        let store = RestStore::new(&settings.variable_defaults)?;
        let connection = Arc::new(RestConnection::new(
            transport,
            password,
            tuning.call_timeout,
            events,
        ));
        let globals = GlobalsBlock::for_registry(store.registry(), connection.clone(), tuning.bulk_period)
            .map(Arc::new);
        Ok(Self {
            connection,
            store,
            globals,
            settings,
            tuning,
            provisioned: AtomicBool::new(false),
        })
    }

    /// HTTP backend for the configured firmware.
    ///
    /// Fails only when the HTTP client cannot be built or the store is
    /// inconsistent.
    pub fn from_config(config: &Config, events: Arc<EventBus>) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(
            &config.connection.host,
            config.connection.effective_port(),
            config.connection.timeout(),
        )?;
        let backend = Self::new(
            Arc::new(transport),
            config.connection.password.clone(),
            config.rest.clone(),
            config.tuning(),
            events,
        )?;
        Ok(backend)
    }

    /// The validated connection
    pub fn connection(&self) -> &Arc<RestConnection> {
        &self.connection
    }

    /// Full path of the provisioning macro
    pub fn defaults_path(&self) -> String {
        format!("{}/{}", Self::SYSTEM_DIR, self.settings.defaults_file)
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.settings.wait_interval_ms)
    }

    fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.control_timeout_ms)
    }

    /// Persisted globals the firmware does not have yet
    pub async fn missing_globals(&self) -> anyhow::Result<Vec<String>> {
        let globals = self.connection.model("global").await?;
        let present = globals.as_object();
        Ok(self
            .store
            .persisted()
            .iter()
            .filter(|d| !present.is_some_and(|map| map.contains_key(&d.name)))
            .map(|d| d.name.clone())
            .collect())
    }

    /// Upload the defaults macro if absent or out of date, then run it
    async fn provision(&self) -> anyhow::Result<()> {
        let path = self.defaults_path();
        let content = defaults_macro(self.store.persisted());
        match self.connection.download(&path).await? {
            Some(existing) if existing == content => {}
            Some(_) => {
                self.connection.upload(&path, content.as_bytes()).await?;
                tracing::info!(path = %path, "Replaced stale persisted variable defaults");
            }
            None => {
                self.connection.upload(&path, content.as_bytes()).await?;
                tracing::info!(path = %path, "Uploaded persisted variable defaults");
            }
        }
        self.connection.gcode(&format!("M98 P\"{}\"", path)).await?;
        Ok(())
    }

    /// Queue a G-code command
    pub async fn send_gcode(&self, code: &str) -> bool {
        match self.connection.gcode(code).await {
            Ok(()) => true,
            Err(e) => {
                self.connection.report(&format!("G-code {}", code), &e);
                false
            }
        }
    }

    /// Live check that every axis is homed
    pub async fn all_axes_homed(&self) -> Option<bool> {
        let mut all = true;
        for axis in &self.store.axis_homed {
            all &= axis.read(self.connection.as_ref()).await?;
        }
        Some(all)
    }

    /// Home every axis and wait until all report homed
    pub async fn home_axes(&self) -> bool {
        if !self.send_gcode("G28").await {
            return false;
        }
        wait_until(
            || self.all_axes_homed(),
            |all| *all,
            self.interval(),
            Duration::from_millis(self.settings.homing_timeout_ms),
        )
        .await
        .is_some()
    }

    /// Send `code`, then wait for the machine status to become `status`
    async fn command_until_status(&self, code: &str, status: &str) -> bool {
        if !self.send_gcode(code).await {
            return false;
        }
        let reached = wait_until(
            || self.store.machine_status.read(self.connection.as_ref()),
            |current| current == status,
            self.interval(),
            self.control_timeout(),
        )
        .await
        .is_some();
        if !reached {
            tracing::warn!(gcode = code, expected = status, "Machine status did not follow");
        }
        reached
    }

    /// Resume the current print or job
    pub async fn cycle_start(&self) -> bool {
        self.command_until_status("M24", "processing").await
    }

    /// Stop at the end of the current move
    pub async fn cycle_stop(&self) -> bool {
        self.command_until_status("M0", "idle").await
    }

    /// Pause the current job
    pub async fn feed_hold(&self) -> bool {
        self.command_until_status("M25", "paused").await
    }

    /// Store a file on the firmware
    pub async fn upload_file(&self, path: &str, content: &[u8]) -> bool {
        match self.connection.upload(path, content).await {
            Ok(()) => true,
            Err(e) => {
                self.connection.report(&format!("Upload {}", path), &e);
                false
            }
        }
    }

    /// Whether a file exists; absent when the firmware cannot be asked
    pub async fn file_exists(&self, path: &str) -> Option<bool> {
        match self.connection.file_exists(path).await {
            Ok(exists) => Some(exists),
            Err(e) => {
                self.connection.report(&format!("File info {}", path), &e);
                None
            }
        }
    }
}

#[async_trait]
impl Backend for RestBackend {
    type Address = RestAddress;
    type Store = RestStore;
    type Phase = RestPhase;

    const KIND: BackendKind = BackendKind::Rest;

    fn store(&self) -> &RestStore {
        &self.store
    }

    fn live_access(&self) -> Arc<dyn MemoryAccess<RestAddress>> {
        self.connection.clone()
    }

    fn polling_access(&self) -> Arc<dyn MemoryAccess<RestAddress>> {
        Arc::new(CachedAccess::new(
            self.connection.clone(),
            self.globals.clone(),
            self.tuning.bulk_period * 2,
        ))
    }

    fn bulk_buffers(&self) -> Vec<Arc<dyn BulkBuffer>> {
        self.globals
            .iter()
            .map(|block| block.clone() as Arc<dyn BulkBuffer>)
            .collect()
    }

    fn tuning(&self) -> &BackendTuning {
        &self.tuning
    }

    async fn step(&self, phase: RestPhase, ctx: &StepContext) -> anyhow::Result<StepOutcome> {
        let outcome = match phase {
            RestPhase::ConnectTransport => match self.connection.ping().await {
                Ok(()) => StepOutcome::Advance,
                Err(e) => {
                    self.connection.report("Connect", &e);
                    StepOutcome::Retry(e.to_string())
                }
            },
            RestPhase::DisconnectStaleSession => {
                if let Err(e) = self.connection.disconnect_session().await {
                    tracing::debug!("No stale session to drop: {}", e);
                }
                StepOutcome::Advance
            }
            RestPhase::ConnectSession => {
                self.connection.connect_session().await?;
                StepOutcome::Advance
            }
            RestPhase::ReadStatus => match self.connection.model("state.status").await? {
                Json::String(status) => {
                    tracing::info!(status = %status, "Firmware status");
                    StepOutcome::Advance
                }
                _ => StepOutcome::Retry("machine status not available yet".to_string()),
            },
            RestPhase::InitializeVariables => {
                let missing = self.missing_globals().await?;
                if missing.is_empty() {
                    StepOutcome::Advance
                } else if self.provisioned.load(Ordering::SeqCst) {
                    StepOutcome::Retry(format!("globals still missing: {}", missing.join(", ")))
                } else {
                    tracing::info!(missing = ?missing, "Provisioning persisted globals");
                    self.provision().await?;
                    self.provisioned.store(true, Ordering::SeqCst);
                    StepOutcome::Wait
                }
            }
            RestPhase::WaitFullMemoryRead if ctx.full_read => StepOutcome::Advance,
            RestPhase::WaitFullMemoryRead => StepOutcome::Wait,
            RestPhase::Done => StepOutcome::Advance,
        };
        Ok(outcome)
    }

    async fn check_alive(&self) -> anyhow::Result<()> {
        self.connection.model("state.status").await?;
        Ok(())
    }

    async fn reset_transport(&self) {
        self.provisioned.store(false, Ordering::SeqCst);
        if self.connection.has_session() {
            if let Err(e) = self.connection.disconnect_session().await {
                tracing::debug!("Session already gone: {}", e);
            }
        }
    }
}
