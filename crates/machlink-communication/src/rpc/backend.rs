//! RPC controller backend
//!
//! Bring-up: open the session, select the boot mode, wait for the system
//! to come up, enable auxiliary power, reset, select the process mode,
//! reference the axes and wait for the first full memory read.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use machlink_core::{
    try_wait_until, wait_until, Backend, BackendKind, BackendTuning, BulkBuffer, ConnectionPhase,
    EventBus, MemoryAccess, StepContext, StepOutcome, StoreError, Value, ValueKind, Variable,
    VariableStore,
};
use machlink_settings::{Config, RpcSettings};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::address::{Area, RpcAddress};
use super::bulk::{BlockCache, CachedAccess};
use super::connection::RpcConnection;
use super::protocol::SystemState;
use super::store::RpcStore;
use super::transport::{RpcTransport, TcpTransport};

/// Bring-up phases of the RPC controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcPhase {
    /// Open the TCP session
    Connect,
    /// Select the boot mode
    SelectBootMode,
    /// Wait until the controller reports itself up
    WaitSystemUp,
    /// Enable auxiliary power
    EnableAuxiliary,
    /// Reset alarms
    Reset,
    /// Select the process mode
    SelectProcessMode,
    /// Reference every axis
    ReferenceAxes,
    /// Wait for the memory buffer's full-read latch
    WaitFullMemoryRead,
    /// Operational
    Done,
}

impl fmt::Display for RpcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcPhase::Connect => "connect",
            RpcPhase::SelectBootMode => "select boot mode",
            RpcPhase::WaitSystemUp => "wait system up",
            RpcPhase::EnableAuxiliary => "enable auxiliary",
            RpcPhase::Reset => "reset",
            RpcPhase::SelectProcessMode => "select process mode",
            RpcPhase::ReferenceAxes => "reference axes",
            RpcPhase::WaitFullMemoryRead => "wait full memory read",
            RpcPhase::Done => "done",
        };
        f.write_str(name)
    }
}

impl ConnectionPhase for RpcPhase {
    const ALL: &'static [Self] = &[
        RpcPhase::Connect,
        RpcPhase::SelectBootMode,
        RpcPhase::WaitSystemUp,
        RpcPhase::EnableAuxiliary,
        RpcPhase::Reset,
        RpcPhase::SelectProcessMode,
        RpcPhase::ReferenceAxes,
        RpcPhase::WaitFullMemoryRead,
        RpcPhase::Done,
    ];
    const INITIALIZING: Self = RpcPhase::SelectBootMode;
}

/// Transport, store and bring-up of one RPC controller
pub struct RpcBackend {
    connection: Arc<RpcConnection>,
    store: RpcStore,
    blocks: Vec<Arc<BlockCache>>,
    settings: RpcSettings,
    tuning: BackendTuning,
}

impl RpcBackend {
    /// Assemble a backend over `transport`
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        settings: RpcSettings,
        tuning: BackendTuning,
        events: Arc<EventBus>,
    ) -> Result<Self, StoreError> {
        let store = RpcStore::new()?;
        let connection = Arc::new(RpcConnection::new(transport, tuning.call_timeout, events));
        let blocks = [Area::Word, Area::Double]
            .into_iter()
            .filter_map(|area| {
                BlockCache::for_area(store.registry(), area, connection.clone(), tuning.bulk_period)
            })
            .map(Arc::new)
            .collect();
        Ok(Self {
            connection,
            store,
            blocks,
            settings,
            tuning,
        })
    }

    /// TCP backend for the configured controller
    pub fn from_config(config: &Config, events: Arc<EventBus>) -> Result<Self, StoreError> {
        let transport = TcpTransport::new(
            config.connection.host.clone(),
            config.connection.effective_port(),
            config.connection.timeout(),
        );
        Self::new(
            Arc::new(transport),
            config.rpc.clone(),
            config.tuning(),
            events,
        )
    }

    /// The validated connection
    pub fn connection(&self) -> &Arc<RpcConnection> {
        &self.connection
    }

    /// Bulk blocks discovered from the store
    pub fn blocks(&self) -> &[Arc<BlockCache>] {
        &self.blocks
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.settings.wait_interval_ms)
    }

    fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.control_timeout_ms)
    }

    /// Live check that X, Y and Z are referenced
    pub async fn all_axes_homed(&self) -> Option<bool> {
        let mut all = true;
        for axis in self.store.axis_homed.iter().take(RpcStore::AXES.len()) {
            all &= axis.read(self.connection.as_ref()).await?;
        }
        Some(all)
    }

    async fn read_flag(&self, flag: &Variable<RpcAddress, bool>) -> anyhow::Result<bool> {
        let address = flag
            .address()
            .ok_or_else(|| anyhow!("{} has no address", flag.name()))?;
        self.connection
            .read_cell(address, ValueKind::Bool)
            .await?
            .and_then(|value| value.as_bool())
            .ok_or_else(|| anyhow!("{} did not decode as a flag", flag.name()))
    }

    async fn write_flag(&self, flag: &Variable<RpcAddress, bool>, value: bool) -> anyhow::Result<()> {
        let address = flag
            .address()
            .ok_or_else(|| anyhow!("{} has no address", flag.name()))?;
        self.connection.write_cell(address, &Value::Bool(value)).await?;
        Ok(())
    }

    async fn linear_axes_homed(&self) -> anyhow::Result<bool> {
        for axis in self.store.axis_homed.iter().take(RpcStore::AXES.len()) {
            if !self.read_flag(axis).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Homing during bring-up; transport faults end the step
    async fn reference_axes(&self) -> anyhow::Result<bool> {
        if self.linear_axes_homed().await? {
            return Ok(true);
        }
        self.write_flag(&self.store.home_request, true).await?;
        let homed = try_wait_until(
            || self.linear_axes_homed(),
            |all| *all,
            self.interval(),
            Duration::from_millis(self.settings.homing_timeout_ms),
        )
        .await;
        let cleared = self.write_flag(&self.store.home_request, false).await;
        let homed = homed?.is_some();
        cleared?;
        Ok(homed)
    }

    /// Raise `request`, wait for `done` to read `expected`, then drop the request
    async fn pulse(
        &self,
        request: &Variable<RpcAddress, bool>,
        done: &Variable<RpcAddress, bool>,
        expected: bool,
        limit: Duration,
    ) -> bool {
        let access = self.connection.as_ref();
        if !request.send(access, true).await {
            return false;
        }
        let reached = wait_until(
            || done.read(access),
            |state| *state == expected,
            self.interval(),
            limit,
        )
        .await
        .is_some();
        if !request.send(access, false).await {
            tracing::warn!(request = %request.name(), "Could not clear request bit");
        }
        if !reached {
            tracing::warn!(
                request = %request.name(),
                timeout_ms = limit.as_millis() as u64,
                "Controller did not acknowledge request"
            );
        }
        reached
    }

    /// Reference every axis and wait until X, Y and Z report homed
    pub async fn home_axes(&self) -> bool {
        let access = self.connection.as_ref();
        if !self.store.home_request.send(access, true).await {
            return false;
        }
        let homed = wait_until(
            || self.all_axes_homed(),
            |all| *all,
            self.interval(),
            Duration::from_millis(self.settings.homing_timeout_ms),
        )
        .await
        .is_some();
        if !self.store.home_request.send(access, false).await {
            tracing::warn!("Could not clear home request");
        }
        homed
    }

    /// Start the active program and wait for it to run
    pub async fn cycle_start(&self) -> bool {
        self.pulse(
            &self.store.cycle_start_request,
            &self.store.cycle_running,
            true,
            self.control_timeout(),
        )
        .await
    }

    /// Stop the active program and wait for it to end
    pub async fn cycle_stop(&self) -> bool {
        self.pulse(
            &self.store.cycle_stop_request,
            &self.store.cycle_running,
            false,
            self.control_timeout(),
        )
        .await
    }

    /// Pause motion and wait for the hold to take effect
    pub async fn feed_hold(&self) -> bool {
        self.pulse(
            &self.store.feed_hold_request,
            &self.store.feed_hold_active,
            true,
            self.control_timeout(),
        )
        .await
    }

    /// Store a part program
    pub async fn upload_program(&self, number: u16, content: &str) -> bool {
        match self.connection.upload_program(number, content).await {
            Ok(()) => {
                tracing::info!(program = number, bytes = content.len(), "Program uploaded");
                true
            }
            Err(e) => {
                self.connection.report(&format!("Upload program {}", number), &e);
                false
            }
        }
    }

    /// Make a stored program active
    pub async fn select_program(&self, number: u16) -> bool {
        match self.connection.select_program(number).await {
            Ok(()) => true,
            Err(e) => {
                self.connection.report(&format!("Select program {}", number), &e);
                false
            }
        }
    }
}

#[async_trait]
impl Backend for RpcBackend {
    type Address = RpcAddress;
    type Store = RpcStore;
    type Phase = RpcPhase;

    const KIND: BackendKind = BackendKind::Rpc;

    fn store(&self) -> &RpcStore {
        &self.store
    }

    fn live_access(&self) -> Arc<dyn MemoryAccess<RpcAddress>> {
        self.connection.clone()
    }

    fn polling_access(&self) -> Arc<dyn MemoryAccess<RpcAddress>> {
        Arc::new(CachedAccess::new(
            self.connection.clone(),
            self.blocks.clone(),
            self.tuning.bulk_period * 2,
        ))
    }

    fn bulk_buffers(&self) -> Vec<Arc<dyn BulkBuffer>> {
        self.blocks
            .iter()
            .map(|block| block.clone() as Arc<dyn BulkBuffer>)
            .collect()
    }

    fn tuning(&self) -> &BackendTuning {
        &self.tuning
    }

    async fn step(&self, phase: RpcPhase, ctx: &StepContext) -> anyhow::Result<StepOutcome> {
        let outcome = match phase {
            RpcPhase::Connect => match self.connection.connect().await {
                Ok(()) => StepOutcome::Advance,
                Err(e) => {
                    self.connection.report("Connect", &e);
                    StepOutcome::Retry(e.to_string())
                }
            },
            RpcPhase::SelectBootMode => {
                self.connection.select_boot_mode(self.settings.boot_mode).await?;
                StepOutcome::Advance
            }
            RpcPhase::WaitSystemUp => {
                let status = try_wait_until(
                    || self.connection.system_status(),
                    |status| status.state != SystemState::Booting,
                    self.interval(),
                    Duration::from_millis(self.settings.system_up_timeout_ms),
                )
                .await?;
                match status.map(|s| s.state) {
                    Some(SystemState::Up) => StepOutcome::Advance,
                    Some(_) => StepOutcome::Restart("controller reported a fault".to_string()),
                    None => StepOutcome::Retry("controller is still booting".to_string()),
                }
            }
            RpcPhase::EnableAuxiliary => {
                self.connection.enable_auxiliary().await?;
                StepOutcome::Advance
            }
            RpcPhase::Reset => {
                self.connection.reset().await?;
                StepOutcome::Advance
            }
            RpcPhase::SelectProcessMode => {
                self.connection
                    .select_process_mode(self.settings.process_mode)
                    .await?;
                StepOutcome::Advance
            }
            RpcPhase::ReferenceAxes => {
                if !self.settings.home_on_connect || self.reference_axes().await? {
                    StepOutcome::Advance
                } else {
                    StepOutcome::Retry("axes did not reference in time".to_string())
                }
            }
            RpcPhase::WaitFullMemoryRead if ctx.full_read => StepOutcome::Advance,
            RpcPhase::WaitFullMemoryRead => StepOutcome::Wait,
            RpcPhase::Done => StepOutcome::Advance,
        };
        Ok(outcome)
    }

    async fn check_alive(&self) -> anyhow::Result<()> {
        if !self.connection.is_connected() {
            bail!("session lost");
        }
        let status = self.connection.system_status().await?;
        if status.state != SystemState::Up {
            bail!("controller left the up state: {:?}", status.state);
        }
        Ok(())
    }

    async fn reset_transport(&self) {
        self.connection.disconnect().await;
    }
}
