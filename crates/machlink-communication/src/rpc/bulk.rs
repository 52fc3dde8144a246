//! Bulk blocks over the RPC memory areas
//!
//! One block per area covers exactly the index range the store uses and is
//! fetched in a single request. [`CachedAccess`] serves polling reads from a
//! fresh block and falls back to the live connection otherwise.

use async_trait::async_trait;
use machlink_core::{BulkBuffer, MemoryAccess, Value, ValueKind, VariableRegistry};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::address::{Area, RpcAddress};
use super::connection::{decode_bit, decode_double, decode_word, RpcConnection};

#[derive(Debug, Clone)]
enum BlockData {
    Words(Vec<u16>),
    Doubles(Vec<f64>),
}

#[derive(Debug, Clone)]
struct Block {
    data: BlockData,
    fetched: Instant,
}

/// Contiguous run of one memory area, refreshed in one call
pub struct BlockCache {
    name: String,
    area: Area,
    start: u16,
    count: u16,
    period: Duration,
    connection: Arc<RpcConnection>,
    block: RwLock<Option<Block>>,
}

impl BlockCache {
    /// Block covering every `area` address registered in `registry`.
    ///
    /// `None` when the store uses no address in that area.
    pub fn for_area(
        registry: &VariableRegistry<RpcAddress>,
        area: Area,
        connection: Arc<RpcConnection>,
        period: Duration,
    ) -> Option<Self> {
        let range = registry.address_range(|address| address.area() == area)?;
        let (start, end) = (range.start.index(), range.end.index());
        let Some(count) = (end - start).checked_add(1) else {
            tracing::warn!(?area, start, end, "Bulk range too large, polling per variable");
            return None;
        };
        let name = match area {
            Area::Word => format!("words W{}..=W{}", start, end),
            Area::Double => format!("doubles D{}..=D{}", start, end),
        };
        tracing::debug!(block = %name, "Discovered bulk range");
        Some(Self {
            name,
            area,
            start,
            count,
            period,
            connection,
            block: RwLock::new(None),
        })
    }

    /// First index covered
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Number of cells covered
    pub fn count(&self) -> u16 {
        self.count
    }

    /// Memory area
    pub fn area(&self) -> Area {
        self.area
    }

    /// Serve `address` from the block when it is younger than `max_age`
    pub fn lookup(&self, address: &RpcAddress, kind: ValueKind, max_age: Duration) -> Option<Value> {
        if address.area() != self.area {
            return None;
        }
        let offset = usize::from(address.index().checked_sub(self.start)?);
        let guard = self.block.read();
        let block = guard.as_ref()?;
        if block.fetched.elapsed() > max_age {
            return None;
        }
        match (&block.data, *address) {
            (BlockData::Words(words), RpcAddress::Word { .. }) => {
                words.get(offset).and_then(|raw| decode_word(*raw, kind))
            }
            (BlockData::Words(words), RpcAddress::Bit { bit, .. }) => {
                words.get(offset).map(|raw| decode_bit(*raw, bit))
            }
            (BlockData::Doubles(doubles), RpcAddress::Double { .. }) => {
                doubles.get(offset).and_then(|raw| decode_double(*raw, kind))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl BulkBuffer for BlockCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn refresh(&self) -> bool {
        let data = match self.area {
            Area::Word => self
                .connection
                .read_words(self.start, self.count)
                .await
                .map(BlockData::Words),
            Area::Double => self
                .connection
                .read_doubles(self.start, self.count)
                .await
                .map(BlockData::Doubles),
        };
        match data {
            Ok(data) => {
                *self.block.write() = Some(Block {
                    data,
                    fetched: Instant::now(),
                });
                true
            }
            Err(e) => {
                self.connection.report(&format!("Bulk read {}", self.name), &e);
                false
            }
        }
    }
}

/// Polling access that prefers fresh bulk blocks
pub struct CachedAccess {
    connection: Arc<RpcConnection>,
    blocks: Vec<Arc<BlockCache>>,
    max_age: Duration,
}

impl CachedAccess {
    /// Serve from `blocks` when younger than `max_age`
    pub fn new(connection: Arc<RpcConnection>, blocks: Vec<Arc<BlockCache>>, max_age: Duration) -> Self {
        Self {
            connection,
            blocks,
            max_age,
        }
    }
}

#[async_trait]
impl MemoryAccess<RpcAddress> for CachedAccess {
    async fn read(&self, address: &RpcAddress, kind: ValueKind) -> Option<Value> {
        let cached = self
            .blocks
            .iter()
            .find_map(|block| block.lookup(address, kind, self.max_age));
        match cached {
            Some(value) => Some(value),
            None => self.connection.read(address, kind).await,
        }
    }

    async fn write(&self, address: &RpcAddress, value: Value) -> bool {
        self.connection.write(address, value).await
    }
}
