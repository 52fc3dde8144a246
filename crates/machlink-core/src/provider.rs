//! Connection provider
//!
//! The provider owns a backend (transport plus typed store), the memory
//! buffer polling that store, and the bring-up phase machine. It is the
//! stable, protocol-agnostic surface the rest of the application talks to:
//! live reads and writes, cached observation, and lifecycle status.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::access::MemoryAccess;
use crate::address::Address;
use crate::array::Array;
use crate::event_bus::{AppEvent, ConnectionEvent, EventBus, MachineMessage};
use crate::memory_buffer::{BulkBuffer, MemoryBuffer};
use crate::phase::{ConnectionPhase, PhaseMachine, RetryPolicy, StepOutcome, Transition};
use crate::priority::PollPeriods;
use crate::store::VariableStore;
use crate::value::{Value, VariableType};
use crate::variable::Variable;

/// Which protocol a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Stateful RPC-style CNC controller
    Rpc,
    /// Stateless HTTP/REST firmware
    Rest,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Rpc => write!(f, "rpc"),
            BackendKind::Rest => write!(f, "rest"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rpc" => Ok(BackendKind::Rpc),
            "rest" => Ok(BackendKind::Rest),
            other => Err(format!("unknown backend kind: {}", other)),
        }
    }
}

/// Scheduling parameters of one backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTuning {
    /// Poll period per priority
    pub periods: PollPeriods,
    /// Refresh period of bulk buffers
    pub bulk_period: Duration,
    /// Interval between bring-up steps
    pub roll_interval: Duration,
    /// Bound on each transport call
    pub call_timeout: Duration,
    /// Bound on one bring-up step, waits included
    pub step_timeout: Duration,
    /// Soft failures tolerated per phase
    pub retry: RetryPolicy,
}

impl BackendTuning {
    /// Defaults for the RPC controller
    pub fn rpc() -> Self {
        Self {
            periods: PollPeriods::from_millis([25, 50, 100, 200, 400]),
            bulk_period: Duration::from_millis(100),
            roll_interval: Duration::from_millis(250),
            call_timeout: Duration::from_millis(500),
            step_timeout: Duration::from_secs(120),
            retry: RetryPolicy {
                max_retries_per_phase: 40,
            },
        }
    }

    /// Defaults for the REST firmware
    pub fn rest() -> Self {
        Self {
            periods: PollPeriods::from_millis([50, 100, 200, 400, 800]),
            bulk_period: Duration::from_millis(250),
            roll_interval: Duration::from_millis(500),
            call_timeout: Duration::from_millis(2000),
            step_timeout: Duration::from_secs(120),
            retry: RetryPolicy {
                max_retries_per_phase: 10,
            },
        }
    }

    /// Defaults for a backend kind
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Rpc => Self::rpc(),
            BackendKind::Rest => Self::rest(),
        }
    }
}

/// What a bring-up step may inspect besides the backend itself
#[derive(Clone)]
pub struct StepContext {
    /// Whether the memory buffer's full-read latch is set
    pub full_read: bool,
    /// Message bus for diagnostics
    pub events: Arc<EventBus>,
}

/// One protocol backend: transport, typed store and bring-up steps
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Address kind
    type Address: Address;
    /// Typed variable store
    type Store: VariableStore<Address = Self::Address>;
    /// Bring-up phases
    type Phase: ConnectionPhase;

    /// Backend kind tag
    const KIND: BackendKind;

    /// The store, built once
    fn store(&self) -> &Self::Store;

    /// Access that always hits the transport
    fn live_access(&self) -> Arc<dyn MemoryAccess<Self::Address>>;

    /// Access used by the poll loops; may be served from bulk buffers
    fn polling_access(&self) -> Arc<dyn MemoryAccess<Self::Address>> {
        self.live_access()
    }

    /// Bulk buffers refreshed alongside the poll loops
    fn bulk_buffers(&self) -> Vec<Arc<dyn BulkBuffer>> {
        Vec::new()
    }

    /// Scheduling parameters
    fn tuning(&self) -> &BackendTuning;

    /// Do one unit of work for `phase`
    async fn step(&self, phase: Self::Phase, ctx: &StepContext) -> anyhow::Result<StepOutcome>;

    /// Confirm a ready machine is still reachable.
    ///
    /// Polled at the roll interval once bring-up is done; an error sends the
    /// machine back to the initial phase.
    async fn check_alive(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Drop the session so the next bring-up starts clean
    async fn reset_transport(&self);
}

struct Shared<B: Backend> {
    backend: Arc<B>,
    buffer: MemoryBuffer<B::Address>,
    machine: PhaseMachine<B::Phase>,
    events: Arc<EventBus>,
    step: Mutex<Option<AbortHandle>>,
}

impl<B: Backend> Shared<B> {
    async fn roll(&self) -> Transition<B::Phase> {
        let phase = self.machine.current();
        if phase.is_terminal() {
            let limit = self.backend.tuning().call_timeout;
            let result = match timeout(limit, self.backend.check_alive()).await {
                Ok(Ok(())) => return Transition::Idle,
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err("liveness check timed out".to_string()),
            };
            return self.report(self.machine.apply(phase, result)).await;
        }

        let ctx = StepContext {
            full_read: self.buffer.is_full_read(),
            events: self.events.clone(),
        };
        let backend = self.backend.clone();
        let mut task = tokio::spawn(async move { backend.step(phase, &ctx).await });
        if let Some(previous) = self.step.lock().replace(task.abort_handle()) {
            previous.abort();
        }

        let result = match timeout(self.backend.tuning().step_timeout, &mut task).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
            Ok(Err(join_error)) if join_error.is_cancelled() => {
                // Aborted by a reset or stop; the machine has already moved on
                return Transition::Stayed(self.machine.current());
            }
            Ok(Err(_)) => Err("step panicked".to_string()),
            Err(_) => {
                task.abort();
                Err("step timed out".to_string())
            }
        };

        self.report(self.machine.apply(phase, result)).await
    }

    async fn report(&self, transition: Transition<B::Phase>) -> Transition<B::Phase> {
        match &transition {
            Transition::Advanced { from, to } => {
                tracing::info!(backend = %B::KIND, from = %from, to = %to, "Phase advanced");
                if !to.is_connecting() {
                    self.buffer.start();
                }
                self.events.publish(AppEvent::Connection(ConnectionEvent::PhaseChanged {
                    backend: B::KIND,
                    phase: to.to_string(),
                    progress: to.progress(),
                }));
                if to.is_terminal() {
                    self.events
                        .publish(AppEvent::Connection(ConnectionEvent::Ready { backend: B::KIND }));
                    self.events.message(MachineMessage::info(
                        B::KIND,
                        "Connected",
                        "Machine is ready",
                    ));
                }
            }
            Transition::Restarted { from, reason } => {
                tracing::warn!(backend = %B::KIND, phase = %from, "Restarting bring-up: {}", reason);
                self.buffer.stop();
                self.backend.reset_transport().await;
                self.events.publish(AppEvent::Connection(ConnectionEvent::Restarted {
                    backend: B::KIND,
                    from_phase: from.to_string(),
                    reason: reason.clone(),
                }));
                self.events.message(MachineMessage::warning(
                    B::KIND,
                    format!("Connection reset in {}", from),
                    reason.clone(),
                ));
            }
            Transition::Stayed(_) | Transition::Idle => {}
        }
        transition
    }

    fn abort_step(&self) {
        if let Some(step) = self.step.lock().take() {
            step.abort();
        }
    }

    fn is_online(&self) -> bool {
        !self.machine.current().is_connecting()
    }
}

/// Protocol-agnostic surface over one backend
pub struct ConnectionProvider<B: Backend> {
    shared: Arc<Shared<B>>,
    roll_task: Mutex<Option<JoinHandle<()>>>,
    latch_task: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Backend> ConnectionProvider<B> {
    /// Wrap a backend. Nothing runs until [`Self::start_connection`].
    pub fn new(backend: B, events: Arc<EventBus>) -> Self {
        let tuning = backend.tuning().clone();
        let buffer = MemoryBuffer::new(
            backend.store().registry(),
            backend.polling_access(),
            tuning.periods,
            backend.bulk_buffers(),
            tuning.call_timeout,
        );
        Self {
            shared: Arc::new(Shared {
                backend: Arc::new(backend),
                buffer,
                machine: PhaseMachine::new(tuning.retry),
                events,
                step: Mutex::new(None),
            }),
            roll_task: Mutex::new(None),
            latch_task: Mutex::new(None),
        }
    }

    /// Backend kind
    pub fn kind(&self) -> BackendKind {
        B::KIND
    }

    /// The backend
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// The typed store
    pub fn store(&self) -> &B::Store {
        self.shared.backend.store()
    }

    /// The memory buffer
    pub fn buffer(&self) -> &MemoryBuffer<B::Address> {
        &self.shared.buffer
    }

    /// The message bus
    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    fn call_timeout(&self) -> Duration {
        self.shared.backend.tuning().call_timeout
    }

    fn spawn_roll_loop(&self) {
        let shared = self.shared.clone();
        let period = shared.backend.tuning().roll_interval;
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.roll().await;
            }
        });
        if let Some(previous) = self.roll_task.lock().replace(task) {
            previous.abort();
        }

        let mut latch = self.latch_task.lock();
        if latch.is_none() {
            let shared = self.shared.clone();
            *latch = Some(tokio::spawn(async move {
                let mut rx = shared.buffer.watch_full_read();
                if rx.wait_for(|done| *done).await.is_ok() {
                    shared
                        .events
                        .publish(AppEvent::Connection(ConnectionEvent::FullMemoryRead {
                            backend: B::KIND,
                        }));
                }
            }));
        }
    }

    /// (Re)start bring-up from the initial phase
    pub fn start_connection(&self) {
        tracing::info!(backend = %B::KIND, "Starting connection");
        self.shared.abort_step();
        self.shared.machine.reset();
        self.shared
            .events
            .publish(AppEvent::Connection(ConnectionEvent::Started { backend: B::KIND }));
        self.spawn_roll_loop();
    }

    /// Re-run the initialization phases over the open transport.
    ///
    /// Falls back to a full [`Self::start_connection`] when not connected.
    pub fn initialize(&self) {
        if !self.shared.is_online() || self.roll_task.lock().is_none() {
            self.start_connection();
            return;
        }
        tracing::info!(backend = %B::KIND, "Re-initializing");
        self.shared.abort_step();
        self.shared
            .machine
            .reset_to(<B::Phase as ConnectionPhase>::INITIALIZING);
    }

    /// Run one bring-up step now, outside the timer
    pub async fn roll(&self) -> Transition<B::Phase> {
        self.shared.roll().await
    }

    /// Abort bring-up and polling, then close the session
    pub async fn stop(&self) {
        self.halt();
        self.shared.backend.reset_transport().await;
    }

    fn halt(&self) {
        if let Some(task) = self.roll_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.latch_task.lock().take() {
            task.abort();
        }
        self.shared.abort_step();
        self.shared.buffer.stop();
        self.shared.machine.reset();
    }

    /// Current phase
    pub fn phase(&self) -> B::Phase {
        self.shared.machine.current()
    }

    /// Phase changes
    pub fn watch_phase(&self) -> watch::Receiver<B::Phase> {
        self.shared.machine.subscribe()
    }

    /// Whether the transport or session is being opened
    pub fn is_connecting(&self) -> bool {
        self.phase().is_connecting()
    }

    /// Whether the machine is being initialized
    pub fn is_initializing(&self) -> bool {
        self.phase().is_initializing()
    }

    /// Whether bring-up reached the terminal phase
    pub fn is_ready(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Phase index normalized to `0.0..=1.0`
    pub fn connection_progress(&self) -> f64 {
        self.phase().progress()
    }

    /// Wait for the terminal phase, up to `limit`
    pub async fn wait_ready(&self, limit: Duration) -> bool {
        let mut rx = self.watch_phase();
        let ready = matches!(
            timeout(limit, rx.wait_for(|phase| phase.is_terminal())).await,
            Ok(Ok(_))
        );
        ready
    }

    async fn read_live<R, W>(&self, variable: &Variable<B::Address, R, W>) -> Option<R>
    where
        R: VariableType,
        W: VariableType,
    {
        if !self.shared.is_online() {
            return None;
        }
        let access = self.shared.backend.live_access();
        timeout(self.call_timeout(), variable.read(access.as_ref()))
            .await
            .ok()
            .flatten()
    }

    async fn send_live<R, W>(&self, variable: &Variable<B::Address, R, W>, value: W) -> bool
    where
        R: VariableType,
        W: VariableType,
    {
        if !self.shared.is_online() {
            return false;
        }
        let access = self.shared.backend.live_access();
        timeout(self.call_timeout(), variable.send(access.as_ref(), value))
            .await
            .unwrap_or(false)
    }

    async fn toggle_live(&self, variable: &Variable<B::Address, bool, bool>) -> bool {
        if !self.shared.is_online() {
            return false;
        }
        let access = self.shared.backend.live_access();
        let toggle = async {
            match variable.read(access.as_ref()).await {
                Some(current) => variable.send(access.as_ref(), !current).await,
                None => false,
            }
        };
        timeout(self.call_timeout(), toggle).await.unwrap_or(false)
    }

    /// Read a variable from the transport, bypassing the cache.
    ///
    /// Absent when disconnected, on timeout or on any transport fault.
    pub async fn read_variable<R, W, F>(&self, accessor: F) -> Option<R>
    where
        R: VariableType,
        W: VariableType,
        F: FnOnce(&B::Store) -> &Variable<B::Address, R, W>,
    {
        self.read_live(accessor(self.store())).await
    }

    /// Write a variable through to the transport.
    ///
    /// The cached value is left alone; observers see the change after the
    /// variable's group next polls it.
    pub async fn write_variable<R, W, F>(&self, accessor: F, value: W) -> bool
    where
        R: VariableType,
        W: VariableType,
        F: FnOnce(&B::Store) -> &Variable<B::Address, R, W>,
    {
        self.send_live(accessor(self.store()), value).await
    }

    /// Read a boolean live and write back its negation
    pub async fn toggle_variable<F>(&self, accessor: F) -> bool
    where
        F: FnOnce(&B::Store) -> &Variable<B::Address, bool, bool>,
    {
        self.toggle_live(accessor(self.store())).await
    }

    /// Replay-latest stream of the cached value
    pub fn observe_variable<R, W, F>(&self, accessor: F) -> watch::Receiver<Option<R>>
    where
        R: VariableType,
        W: VariableType,
        F: FnOnce(&B::Store) -> &Variable<B::Address, R, W>,
    {
        accessor(self.store()).subscribe()
    }

    /// [`Self::read_variable`] for an array slot
    pub async fn read_element<R, W, F>(&self, accessor: F, unit: &str) -> Option<R>
    where
        R: VariableType,
        W: VariableType,
        F: FnOnce(&B::Store) -> &Array<B::Address, R, W>,
    {
        let variable = accessor(self.store()).by_unit(unit)?;
        self.read_live(variable).await
    }

    /// [`Self::write_variable`] for an array slot
    pub async fn write_element<R, W, F>(&self, accessor: F, unit: &str, value: W) -> bool
    where
        R: VariableType,
        W: VariableType,
        F: FnOnce(&B::Store) -> &Array<B::Address, R, W>,
    {
        match accessor(self.store()).by_unit(unit) {
            Some(variable) => self.send_live(variable, value).await,
            None => false,
        }
    }

    /// [`Self::toggle_variable`] for an array slot
    pub async fn toggle_element<F>(&self, accessor: F, unit: &str) -> bool
    where
        F: FnOnce(&B::Store) -> &Array<B::Address, bool, bool>,
    {
        match accessor(self.store()).by_unit(unit) {
            Some(variable) => self.toggle_live(variable).await,
            None => false,
        }
    }

    /// [`Self::observe_variable`] for an array slot
    pub fn observe_element<R, W, F>(
        &self,
        accessor: F,
        unit: &str,
    ) -> Option<watch::Receiver<Option<R>>>
    where
        R: VariableType,
        W: VariableType,
        F: FnOnce(&B::Store) -> &Array<B::Address, R, W>,
    {
        accessor(self.store()).by_unit(unit).map(Variable::subscribe)
    }

    /// Read by name (or array name plus unit), bypassing the cache
    pub async fn read_named(&self, name: &str, unit: Option<&str>) -> Option<Value> {
        if !self.shared.is_online() {
            return None;
        }
        let entry = self.store().registry().resolve(name, unit).ok()?;
        let access = self.shared.backend.live_access();
        timeout(self.call_timeout(), entry.read_value(access.as_ref()))
            .await
            .ok()
            .flatten()
    }

    /// Write by name (or array name plus unit)
    pub async fn write_named(&self, name: &str, unit: Option<&str>, value: Value) -> bool {
        if !self.shared.is_online() {
            return false;
        }
        let Ok(entry) = self.store().registry().resolve(name, unit) else {
            tracing::warn!(backend = %B::KIND, name, "Write to unknown variable");
            return false;
        };
        let access = self.shared.backend.live_access();
        timeout(self.call_timeout(), entry.send_value(access.as_ref(), value))
            .await
            .unwrap_or(false)
    }

    /// Toggle a boolean by name
    pub async fn toggle_named(&self, name: &str, unit: Option<&str>) -> bool {
        match self.read_named(name, unit).await {
            Some(Value::Bool(current)) => self.write_named(name, unit, Value::Bool(!current)).await,
            _ => false,
        }
    }

    /// Observe by name; `None` for unknown variables
    pub fn observe_named(&self, name: &str, unit: Option<&str>) -> Option<watch::Receiver<Option<Value>>> {
        self.store()
            .registry()
            .resolve(name, unit)
            .ok()
            .map(|entry| entry.observe_value())
    }
}

impl<B: Backend> Drop for ConnectionProvider<B> {
    fn drop(&mut self) {
        self.halt();
    }
}
