//! Bulk buffer over the firmware's user globals
//!
//! The whole `global` subtree is fetched in one `rr_model` request.
//! [`CachedAccess`] answers polling reads of globals from that snapshot
//! while it is fresh and goes to the firmware for everything else.

use async_trait::async_trait;
use machlink_core::{BulkBuffer, MemoryAccess, Value, ValueKind, VariableRegistry};
use parking_lot::RwLock;
use serde_json::{Map, Value as Json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::address::RestAddress;
use super::connection::RestConnection;

struct Snapshot {
    globals: Map<String, Json>,
    fetched: Instant,
}

/// Snapshot of every registered global
pub struct GlobalsBlock {
    names: Vec<String>,
    period: Duration,
    connection: Arc<RestConnection>,
    snapshot: RwLock<Option<Snapshot>>,
}

impl GlobalsBlock {
    /// Block covering every global registered in `registry`.
    ///
    /// `None` when the store declares no globals.
    pub fn for_registry(
        registry: &VariableRegistry<RestAddress>,
        connection: Arc<RestConnection>,
        period: Duration,
    ) -> Option<Self> {
        let mut names: Vec<String> = registry
            .entries()
            .iter()
            .filter_map(|entry| entry.address()?.global_name().map(str::to_string))
            .collect();
        if names.is_empty() {
            return None;
        }
        names.sort();
        names.dedup();
        tracing::debug!(globals = ?names, "Discovered global variables");
        Some(Self {
            names,
            period,
            connection,
            snapshot: RwLock::new(None),
        })
    }

    /// Registered global names, sorted
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Registered globals absent from the last snapshot; all of them before the first
    pub fn missing(&self) -> Vec<String> {
        match self.snapshot.read().as_ref() {
            Some(snapshot) => self
                .names
                .iter()
                .filter(|name| !snapshot.globals.contains_key(*name))
                .cloned()
                .collect(),
            None => self.names.clone(),
        }
    }

    /// Serve `address` from the snapshot when it is younger than `max_age`
    pub fn lookup(&self, address: &RestAddress, kind: ValueKind, max_age: Duration) -> Option<Value> {
        let name = address.global_name()?;
        let guard = self.snapshot.read();
        let snapshot = guard.as_ref()?;
        if snapshot.fetched.elapsed() > max_age {
            return None;
        }
        let node = address.select(snapshot.globals.get(name)?)?;
        Value::from_json(node, kind)
    }
}

#[async_trait]
impl BulkBuffer for GlobalsBlock {
    fn name(&self) -> &str {
        "globals"
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn refresh(&self) -> bool {
        match self.connection.model("global").await {
            Ok(Json::Object(globals)) => {
                *self.snapshot.write() = Some(Snapshot {
                    globals,
                    fetched: Instant::now(),
                });
                let missing = self.missing();
                if !missing.is_empty() {
                    tracing::debug!(missing = ?missing, "Globals not defined on the firmware yet");
                }
                true
            }
            Ok(other) => {
                tracing::debug!(value = %other, "Global subtree is not an object yet");
                false
            }
            Err(e) => {
                self.connection.report("Bulk read globals", &e);
                false
            }
        }
    }
}

/// Polling access that prefers the globals snapshot
pub struct CachedAccess {
    connection: Arc<RestConnection>,
    globals: Option<Arc<GlobalsBlock>>,
    max_age: Duration,
}

impl CachedAccess {
    /// Serve globals from `globals` when younger than `max_age`
    pub fn new(connection: Arc<RestConnection>, globals: Option<Arc<GlobalsBlock>>, max_age: Duration) -> Self {
        Self {
            connection,
            globals,
            max_age,
        }
    }
}

#[async_trait]
impl MemoryAccess<RestAddress> for CachedAccess {
    async fn read(&self, address: &RestAddress, kind: ValueKind) -> Option<Value> {
        let cached = self
            .globals
            .as_ref()
            .and_then(|block| block.lookup(address, kind, self.max_age));
        match cached {
            Some(value) => Some(value),
            None => self.connection.read(address, kind).await,
        }
    }

    async fn write(&self, address: &RestAddress, value: Value) -> bool {
        self.connection.write(address, value).await
    }
}
