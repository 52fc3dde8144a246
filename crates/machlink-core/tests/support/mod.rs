//! Shared fixtures: a register address, scripted memory and a toy backend

#![allow(dead_code)]

use async_trait::async_trait;
use machlink_core::{
    Address, Backend, BackendKind, BackendTuning, ConnectionPhase, MemoryAccess, PollPeriods,
    Priority, RetryPolicy, StepContext, StepOutcome, Value, ValueKind, Variable, VariableRegistry,
    VariableStore,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u32);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl Address for Reg {
    fn increment(&self) -> Option<Self> {
        self.0.checked_add(1).map(Reg)
    }
}

/// Register memory with per-address failure injection
#[derive(Default)]
pub struct ScriptedMemory {
    cells: Mutex<HashMap<u32, Value>>,
    failing: Mutex<HashSet<u32>>,
    reads: Mutex<HashMap<u32, usize>>,
}

impl ScriptedMemory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, index: u32, value: Value) {
        self.cells.lock().insert(index, value);
    }

    pub fn get(&self, index: u32) -> Option<Value> {
        self.cells.lock().get(&index).cloned()
    }

    pub fn fail(&self, index: u32) {
        self.failing.lock().insert(index);
    }

    pub fn heal(&self, index: u32) {
        self.failing.lock().remove(&index);
    }

    pub fn reads(&self, index: u32) -> usize {
        self.reads.lock().get(&index).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MemoryAccess<Reg> for ScriptedMemory {
    async fn read(&self, address: &Reg, _kind: ValueKind) -> Option<Value> {
        *self.reads.lock().entry(address.0).or_default() += 1;
        if self.failing.lock().contains(&address.0) {
            return None;
        }
        self.get(address.0)
    }

    async fn write(&self, address: &Reg, value: Value) -> bool {
        if self.failing.lock().contains(&address.0) {
            return false;
        }
        self.set(address.0, value);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToyPhase {
    Open,
    Login,
    Configure,
    Sync,
    Done,
}

impl fmt::Display for ToyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl ConnectionPhase for ToyPhase {
    const ALL: &'static [Self] = &[
        ToyPhase::Open,
        ToyPhase::Login,
        ToyPhase::Configure,
        ToyPhase::Sync,
        ToyPhase::Done,
    ];
    const INITIALIZING: Self = ToyPhase::Configure;
}

pub struct ToyStore {
    pub tool: Variable<Reg, u16>,
    pub queue: Variable<Reg, i32>,
    pub light: Variable<Reg, bool>,
    pub busy: Variable<Reg, bool>,
    pub idle: Variable<Reg, bool>,
    registry: VariableRegistry<Reg>,
}

impl ToyStore {
    pub fn new() -> Self {
        let tool = Variable::new("tool", Reg(1), Priority::High);
        let queue = Variable::new("queue", Reg(2), Priority::Low);
        let light = Variable::new("light", Reg(3), Priority::Low);
        let busy: Variable<Reg, bool> = Variable::new("busy", Reg(4), Priority::High);
        let idle = Variable::derived("idle", &[&busy], |v| v[0].map(|busy| !busy));

        let mut builder = VariableRegistry::builder();
        builder
            .variable(&tool)
            .and_then(|b| b.variable(&queue))
            .and_then(|b| b.variable(&light))
            .and_then(|b| b.variable(&busy))
            .and_then(|b| b.variable(&idle))
            .expect("toy store registers cleanly");

        Self {
            tool,
            queue,
            light,
            busy,
            idle,
            registry: builder.build(),
        }
    }
}

impl VariableStore for ToyStore {
    type Address = Reg;

    fn registry(&self) -> &VariableRegistry<Reg> {
        &self.registry
    }
}

pub struct ToyBackend {
    pub memory: Arc<ScriptedMemory>,
    pub store: ToyStore,
    pub tuning: BackendTuning,
    pub fail_at: Mutex<Option<ToyPhase>>,
    pub panic_at: Mutex<Option<ToyPhase>>,
    /// Steps in this phase sleep half a second before finishing
    pub stall_at: Mutex<Option<ToyPhase>>,
    pub stalls_completed: AtomicUsize,
    pub alive: AtomicBool,
    pub steps: AtomicUsize,
    pub resets: AtomicUsize,
}

impl ToyBackend {
    /// Polls every hour so tests decide when groups tick after the first cycle
    pub fn new(memory: Arc<ScriptedMemory>) -> Self {
        Self::with_periods(memory, PollPeriods::from_millis([3_600_000; 5]))
    }

    pub fn with_periods(memory: Arc<ScriptedMemory>, periods: PollPeriods) -> Self {
        Self {
            memory,
            store: ToyStore::new(),
            tuning: BackendTuning {
                periods,
                bulk_period: Duration::from_millis(100),
                roll_interval: Duration::from_millis(50),
                call_timeout: Duration::from_millis(100),
                step_timeout: Duration::from_secs(1),
                retry: RetryPolicy {
                    max_retries_per_phase: 3,
                },
            },
            fail_at: Mutex::new(None),
            panic_at: Mutex::new(None),
            stall_at: Mutex::new(None),
            stalls_completed: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            steps: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Backend for ToyBackend {
    type Address = Reg;
    type Store = ToyStore;
    type Phase = ToyPhase;

    const KIND: BackendKind = BackendKind::Rpc;

    fn store(&self) -> &ToyStore {
        &self.store
    }

    fn live_access(&self) -> Arc<dyn MemoryAccess<Reg>> {
        self.memory.clone()
    }

    fn tuning(&self) -> &BackendTuning {
        &self.tuning
    }

    async fn step(&self, phase: ToyPhase, ctx: &StepContext) -> anyhow::Result<StepOutcome> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        if self.fail_at.lock().take_if(|p| *p == phase).is_some() {
            anyhow::bail!("injected fault in {}", phase);
        }
        if self.panic_at.lock().take_if(|p| *p == phase).is_some() {
            panic!("injected panic in {}", phase);
        }
        let stall = *self.stall_at.lock() == Some(phase);
        if stall {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.stalls_completed.fetch_add(1, Ordering::SeqCst);
        }
        match phase {
            ToyPhase::Sync if !ctx.full_read => Ok(StepOutcome::Wait),
            _ => Ok(StepOutcome::Advance),
        }
    }

    async fn check_alive(&self) -> anyhow::Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            anyhow::bail!("toy link dropped");
        }
        Ok(())
    }

    async fn reset_transport(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Memory with every toy variable readable
pub fn seeded_memory() -> Arc<ScriptedMemory> {
    let memory = ScriptedMemory::new();
    memory.set(1, Value::Int(2));
    memory.set(2, Value::Int(0));
    memory.set(3, Value::Bool(false));
    memory.set(4, Value::Bool(true));
    memory
}
