use crate::support::{Reg, ScriptedMemory};
use machlink_core::{
    BulkBuffer, MemoryBuffer, PollPeriods, Priority, Value, Variable, VariableRegistry,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct Scenario {
    high: Vec<Variable<Reg, i32>>,
    low: Vec<Variable<Reg, i32>>,
    registry: VariableRegistry<Reg>,
}

/// Three HIGH variables at R1..R3, two LOW variables at R10, R11
fn scenario(memory: &ScriptedMemory) -> Scenario {
    let high: Vec<Variable<Reg, i32>> = (1..=3)
        .map(|i| Variable::new(format!("high{}", i), Reg(i), Priority::High))
        .collect();
    let low: Vec<Variable<Reg, i32>> = (10..=11)
        .map(|i| Variable::new(format!("low{}", i), Reg(i), Priority::Low))
        .collect();
    for i in [1, 2, 3, 10, 11] {
        memory.set(i, Value::Int(i64::from(i) * 100));
    }

    let mut builder = VariableRegistry::builder();
    for variable in high.iter().chain(low.iter()) {
        builder.variable(variable).unwrap();
    }
    Scenario {
        high,
        low,
        registry: builder.build(),
    }
}

fn periods() -> PollPeriods {
    // HIGH every 50 ms, LOW every 200 ms
    PollPeriods::from_millis([25, 50, 100, 200, 400])
}

#[tokio::test(start_paused = true)]
async fn full_read_after_250ms_of_ticking() {
    let memory = ScriptedMemory::new();
    let scenario = scenario(&memory);
    let buffer = MemoryBuffer::new(
        &scenario.registry,
        memory.clone(),
        periods(),
        Vec::new(),
        Duration::from_millis(20),
    );
    assert_eq!(buffer.priorities(), vec![Priority::High, Priority::Low]);
    assert!(!buffer.is_full_read());

    buffer.start();
    sleep(Duration::from_millis(250)).await;

    assert!(buffer.is_full_read());
    assert!(buffer.is_group_complete(Priority::High));
    assert!(buffer.is_group_complete(Priority::Low));
    assert_eq!(scenario.high[2].current(), Some(300));
    assert_eq!(scenario.low[1].current(), Some(1100));
    // 0, 50, 100, 150, 200, 250 ms
    assert!(memory.reads(1) >= 5);
    assert!(memory.reads(10) >= 2);
}

#[tokio::test(start_paused = true)]
async fn failing_high_variable_withholds_full_read() {
    let memory = ScriptedMemory::new();
    let scenario = scenario(&memory);
    memory.fail(2);

    let buffer = MemoryBuffer::new(
        &scenario.registry,
        memory.clone(),
        periods(),
        Vec::new(),
        Duration::from_millis(20),
    );
    let mut low_watch = buffer.watch_group(Priority::Low).unwrap();
    buffer.start();

    sleep(Duration::from_millis(250)).await;
    assert!(!buffer.is_full_read());

    sleep(Duration::from_secs(60)).await;
    assert!(!buffer.is_full_read());
    assert!(!buffer.is_group_complete(Priority::High));

    // The LOW group is unaffected
    assert!(*low_watch.borrow_and_update());
    assert_eq!(scenario.low[0].current(), Some(1000));
    assert_eq!(scenario.low[1].current(), Some(1100));

    // The batch still reads the members after the failing one
    assert_eq!(scenario.high[0].current(), Some(100));
    assert_eq!(scenario.high[1].current(), None);
    assert_eq!(scenario.high[2].current(), Some(300));

    // LOW values keep updating
    memory.set(10, Value::Int(7));
    sleep(Duration::from_millis(400)).await;
    assert_eq!(scenario.low[0].current(), Some(7));

    memory.heal(2);
    assert!(buffer.wait_full_read(Duration::from_millis(100)).await);
}

#[tokio::test(start_paused = true)]
async fn latch_survives_later_failures() {
    let memory = ScriptedMemory::new();
    let scenario = scenario(&memory);
    let buffer = MemoryBuffer::new(
        &scenario.registry,
        memory.clone(),
        periods(),
        Vec::new(),
        Duration::from_millis(20),
    );
    let mut full_read = buffer.watch_full_read();
    buffer.start();
    sleep(Duration::from_millis(10)).await;
    assert!(*full_read.borrow_and_update());

    for i in [1, 2, 3, 10, 11] {
        memory.fail(i);
    }
    memory.set(1, Value::Int(-1));
    sleep(Duration::from_secs(5)).await;

    assert!(buffer.is_full_read());
    assert!(buffer.is_group_complete(Priority::High));
    assert!(!full_read.has_changed().unwrap());
    // Failed reads keep the last known value
    assert_eq!(scenario.high[0].current(), Some(100));
}

struct FlakyBlock {
    online: AtomicBool,
    refreshes: AtomicUsize,
}

#[async_trait::async_trait]
impl BulkBuffer for FlakyBlock {
    fn name(&self) -> &str {
        "block"
    }

    fn period(&self) -> Duration {
        Duration::from_millis(100)
    }

    async fn refresh(&self) -> bool {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn bulk_buffers_join_the_aggregate() {
    let memory = ScriptedMemory::new();
    let scenario = scenario(&memory);
    let block = Arc::new(FlakyBlock {
        online: AtomicBool::new(false),
        refreshes: AtomicUsize::new(0),
    });
    let buffer = MemoryBuffer::new(
        &scenario.registry,
        memory.clone(),
        periods(),
        vec![block.clone() as Arc<dyn BulkBuffer>],
        Duration::from_millis(20),
    );
    buffer.start();

    sleep(Duration::from_millis(500)).await;
    assert!(buffer.is_group_complete(Priority::High));
    assert!(buffer.is_group_complete(Priority::Low));
    assert_eq!(buffer.is_bulk_complete("block"), Some(false));
    assert!(!buffer.is_full_read());
    assert!(block.refreshes.load(Ordering::SeqCst) >= 5);

    block.online.store(true, Ordering::SeqCst);
    sleep(Duration::from_millis(150)).await;
    assert_eq!(buffer.is_bulk_complete("block"), Some(true));
    assert!(buffer.is_full_read());
}

#[tokio::test(start_paused = true)]
async fn stop_halts_polling() {
    let memory = ScriptedMemory::new();
    let scenario = scenario(&memory);
    let buffer = MemoryBuffer::new(
        &scenario.registry,
        memory.clone(),
        periods(),
        Vec::new(),
        Duration::from_millis(20),
    );
    buffer.start();
    buffer.start();
    sleep(Duration::from_millis(60)).await;
    assert!(buffer.is_running());

    buffer.stop();
    let before = memory.reads(1);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(memory.reads(1), before);
    assert!(!buffer.is_running());
}
