//! Multi-frequency polling scheduler
//!
//! The memory buffer flattens a store's registry into one group per
//! priority and polls each group on its own timer. It also refreshes any
//! protocol bulk buffers on their own timers, and certifies exactly once
//! that every group and every bulk buffer has completed a successful cycle.
//!
//! Completion flags are latches: once a group has seen every member
//! succeed, later failures never revoke it. A member that never succeeds
//! withholds its group's flag, and with it the full-read latch.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::access::MemoryAccess;
use crate::address::Address;
use crate::priority::{PollPeriods, Priority};
use crate::store::{EntryRef, VariableRegistry};

/// A contiguous block fetched in one request and scheduled on its own
#[async_trait]
pub trait BulkBuffer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Refresh period
    fn period(&self) -> Duration;

    /// Fetch the whole block; `true` on success
    async fn refresh(&self) -> bool;
}

struct PollGroup<A: Address> {
    priority: Priority,
    period: Duration,
    members: Vec<EntryRef<A>>,
    seen: Mutex<Vec<bool>>,
    complete: watch::Sender<bool>,
}

struct BulkSlot {
    buffer: Arc<dyn BulkBuffer>,
    complete: watch::Sender<bool>,
}

struct Shared<A: Address> {
    access: Arc<dyn MemoryAccess<A>>,
    groups: Vec<PollGroup<A>>,
    bulks: Vec<BulkSlot>,
    call_timeout: Duration,
    full_read: watch::Sender<bool>,
}

fn latch(flag: &watch::Sender<bool>) -> bool {
    flag.send_if_modified(|done| {
        if *done {
            false
        } else {
            *done = true;
            true
        }
    })
}

impl<A: Address> Shared<A> {
    async fn poll_group(&self, index: usize) {
        let group = &self.groups[index];
        for (slot, member) in group.members.iter().enumerate() {
            let ok = match timeout(self.call_timeout, member.poll(self.access.as_ref())).await {
                Ok(ok) => ok,
                Err(_) => {
                    tracing::debug!(
                        variable = %member.name(),
                        timeout_ms = self.call_timeout.as_millis() as u64,
                        "Poll timed out"
                    );
                    false
                }
            };
            if ok {
                group.seen.lock()[slot] = true;
            }
        }

        let all_seen = group.seen.lock().iter().all(|s| *s);
        if all_seen && latch(&group.complete) {
            tracing::debug!(priority = %group.priority, "Poll group completed first cycle");
            self.check_full_read();
        }
    }

    async fn refresh_bulk(&self, index: usize) {
        let slot = &self.bulks[index];
        let ok = match timeout(self.call_timeout, slot.buffer.refresh()).await {
            Ok(ok) => ok,
            Err(_) => {
                tracing::debug!(buffer = %slot.buffer.name(), "Bulk refresh timed out");
                false
            }
        };
        if ok && latch(&slot.complete) {
            tracing::debug!(buffer = %slot.buffer.name(), "Bulk buffer completed first cycle");
            self.check_full_read();
        }
    }

    fn check_full_read(&self) {
        let groups_done = self.groups.iter().all(|g| *g.complete.borrow());
        let bulks_done = self.bulks.iter().all(|b| *b.complete.borrow());
        if groups_done && bulks_done && latch(&self.full_read) {
            tracing::info!(
                groups = self.groups.len(),
                bulk_buffers = self.bulks.len(),
                "Full memory read"
            );
        }
    }
}

/// Per-priority polling loops plus full-read tracking
pub struct MemoryBuffer<A: Address> {
    shared: Arc<Shared<A>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: Address> MemoryBuffer<A> {
    /// Group every polled entry of `registry` by priority.
    ///
    /// Each read or bulk refresh is bounded by `call_timeout`.
    pub fn new(
        registry: &VariableRegistry<A>,
        access: Arc<dyn MemoryAccess<A>>,
        periods: PollPeriods,
        bulks: Vec<Arc<dyn BulkBuffer>>,
        call_timeout: Duration,
    ) -> Self {
        let groups: Vec<PollGroup<A>> = Priority::POLLED
            .iter()
            .filter_map(|&priority| {
                let members = registry.by_priority(priority);
                let period = periods.period(priority)?;
                if members.is_empty() {
                    return None;
                }
                let (complete, _) = watch::channel(false);
                Some(PollGroup {
                    priority,
                    period,
                    seen: Mutex::new(vec![false; members.len()]),
                    members,
                    complete,
                })
            })
            .collect();

        let bulks = bulks
            .into_iter()
            .map(|buffer| BulkSlot {
                buffer,
                complete: watch::channel(false).0,
            })
            .collect();

        let shared = Arc::new(Shared {
            access,
            groups,
            bulks,
            call_timeout,
            full_read: watch::channel(false).0,
        });
        // Nothing to read means nothing is missing
        shared.check_full_read();

        Self {
            shared,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one loop per group and per bulk buffer. Idempotent.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        for (index, group) in self.shared.groups.iter().enumerate() {
            let shared = self.shared.clone();
            let period = group.period;
            tracing::debug!(
                priority = %group.priority,
                period_ms = period.as_millis() as u64,
                members = group.members.len(),
                "Starting poll loop"
            );
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    shared.poll_group(index).await;
                }
            }));
        }

        for (index, slot) in self.shared.bulks.iter().enumerate() {
            let shared = self.shared.clone();
            let period = slot.buffer.period();
            tracing::debug!(
                buffer = %slot.buffer.name(),
                period_ms = period.as_millis() as u64,
                "Starting bulk loop"
            );
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    shared.refresh_bulk(index).await;
                }
            }));
        }
    }

    /// Abort every loop. Latches keep their state.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Whether the loops are running
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Priorities that have a poll group, fastest first
    pub fn priorities(&self) -> Vec<Priority> {
        self.shared.groups.iter().map(|g| g.priority).collect()
    }

    /// Run one tick of a group outside its loop.
    ///
    /// Returns `false` when no group exists for `priority`.
    pub async fn poll_group_once(&self, priority: Priority) -> bool {
        match self.shared.groups.iter().position(|g| g.priority == priority) {
            Some(index) => {
                self.shared.poll_group(index).await;
                true
            }
            None => false,
        }
    }

    /// Refresh every bulk buffer once outside its loop
    pub async fn refresh_bulks_once(&self) {
        for index in 0..self.shared.bulks.len() {
            self.shared.refresh_bulk(index).await;
        }
    }

    /// Completion flag of one group; `None` when the priority has no group
    pub fn watch_group(&self, priority: Priority) -> Option<watch::Receiver<bool>> {
        self.shared
            .groups
            .iter()
            .find(|g| g.priority == priority)
            .map(|g| g.complete.subscribe())
    }

    /// Whether a group has completed a full cycle
    pub fn is_group_complete(&self, priority: Priority) -> bool {
        self.shared
            .groups
            .iter()
            .find(|g| g.priority == priority)
            .is_none_or(|g| *g.complete.borrow())
    }

    /// Whether a bulk buffer has completed a refresh
    pub fn is_bulk_complete(&self, name: &str) -> Option<bool> {
        self.shared
            .bulks
            .iter()
            .find(|b| b.buffer.name() == name)
            .map(|b| *b.complete.borrow())
    }

    /// The full-read latch
    pub fn watch_full_read(&self) -> watch::Receiver<bool> {
        self.shared.full_read.subscribe()
    }

    /// Whether every group and bulk buffer has completed a cycle
    pub fn is_full_read(&self) -> bool {
        *self.shared.full_read.borrow()
    }

    /// Wait until the full-read latch is set or `limit` elapses
    pub async fn wait_full_read(&self, limit: Duration) -> bool {
        let mut rx = self.watch_full_read();
        let done = matches!(timeout(limit, rx.wait_for(|done| *done)).await, Ok(Ok(_)));
        done
    }
}

impl<A: Address> Drop for MemoryBuffer<A> {
    fn drop(&mut self) {
        self.stop();
    }
}
