//! Interfaces to the world the engine is embedded in, plus in-memory
//! implementations used by hosts that don't bring their own.

use crate::id::{ItemId, ObserverId, WorldId};
use crate::item::ItemStack;
use crate::location::{BlockLocation, ChunkPos};
use crate::visibility::{Broadcaster, ItemView, SyncEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The world's chunk load state. Sampled once per duct per tick.
pub trait ChunkLoader: Send + Sync {
    fn is_chunk_loaded(&self, world: WorldId, chunk: ChunkPos) -> bool;
}

/// Receives stacks the engine puts into the world as dropped items.
pub trait DropSink: Send {
    fn drop_item(&mut self, world: WorldId, location: BlockLocation, stack: ItemStack);
}

/// Drop sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardDrops;

impl DropSink for DiscardDrops {
    fn drop_item(&mut self, _: WorldId, _: BlockLocation, _: ItemStack) {}
}

// ---------------------------------------------------------------------------
// LoadedChunks
// ---------------------------------------------------------------------------

/// Shared chunk load table.
///
/// Clones are handles to the same table: chunk load/unload notifications
/// from any thread update it, and the tick thread reads it.
#[derive(Debug, Clone, Default)]
pub struct LoadedChunks {
    inner: Arc<RwLock<ChunkTable>>,
}

#[derive(Debug, Default)]
struct ChunkTable {
    all_loaded: bool,
    loaded: BTreeSet<(WorldId, ChunkPos)>,
}

impl LoadedChunks {
    /// A table with no chunks loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that reports every chunk as loaded until `unload` is called
    /// for it.
    pub fn all_loaded() -> Self {
        let chunks = Self::default();
        chunks.inner.write().all_loaded = true;
        chunks
    }

    pub fn load(&self, world: WorldId, chunk: ChunkPos) {
        let mut table = self.inner.write();
        if table.all_loaded {
            table.loaded.remove(&(world, chunk));
        } else {
            table.loaded.insert((world, chunk));
        }
    }

    pub fn unload(&self, world: WorldId, chunk: ChunkPos) {
        let mut table = self.inner.write();
        if table.all_loaded {
            table.loaded.insert((world, chunk));
        } else {
            table.loaded.remove(&(world, chunk));
        }
    }

    /// Load or unload the chunk containing `location`.
    pub fn set_block_loaded(&self, world: WorldId, location: BlockLocation, loaded: bool) {
        if loaded {
            self.load(world, location.chunk());
        } else {
            self.unload(world, location.chunk());
        }
    }
}

impl ChunkLoader for LoadedChunks {
    fn is_chunk_loaded(&self, world: WorldId, chunk: ChunkPos) -> bool {
        let table = self.inner.read();
        // In all-loaded mode the set holds the exceptions.
        table.all_loaded != table.loaded.contains(&(world, chunk))
    }
}

// ---------------------------------------------------------------------------
// DropLog
// ---------------------------------------------------------------------------

/// A dropped stack recorded by [`DropLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub world: WorldId,
    pub location: BlockLocation,
    pub stack: ItemStack,
}

/// A [`DropSink`] that records every drop. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct DropLog {
    drops: Arc<Mutex<Vec<DroppedItem>>>,
}

impl DropLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drops(&self) -> Vec<DroppedItem> {
        self.drops.lock().clone()
    }

    /// Total units dropped so far.
    pub fn total_quantity(&self) -> u32 {
        self.drops.lock().iter().map(|d| d.stack.quantity).sum()
    }

    pub fn clear(&self) {
        self.drops.lock().clear();
    }
}

impl DropSink for DropLog {
    fn drop_item(&mut self, world: WorldId, location: BlockLocation, stack: ItemStack) {
        self.drops.lock().push(DroppedItem {
            world,
            location,
            stack,
        });
    }
}

// ---------------------------------------------------------------------------
// SyncLog
// ---------------------------------------------------------------------------

/// A [`Broadcaster`] that records every delivered event. Clones share the
/// record.
#[derive(Debug, Clone, Default)]
pub struct SyncLog {
    events: Arc<Mutex<Vec<(ObserverId, SyncEvent)>>>,
}

impl SyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(ObserverId, SyncEvent)> {
        self.events.lock().clone()
    }

    /// Events delivered to one observer, in order.
    pub fn events_for(&self, observer: ObserverId) -> Vec<SyncEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(o, _)| *o == observer)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Take and clear the record.
    pub fn take(&self) -> Vec<(ObserverId, SyncEvent)> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Broadcaster for SyncLog {
    fn notify_create(&mut self, observer: ObserverId, item: &ItemView) {
        self.events
            .lock()
            .push((observer, SyncEvent::Create(item.clone())));
    }

    fn notify_update(&mut self, observer: ObserverId, item: &ItemView) {
        self.events
            .lock()
            .push((observer, SyncEvent::Update(item.clone())));
    }

    fn notify_remove(&mut self, observer: ObserverId, item: ItemId) {
        self.events.lock().push((observer, SyncEvent::Remove(item)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ItemTypeId;

    const W: WorldId = WorldId(0);

    #[test]
    fn empty_table_reports_unloaded() {
        let chunks = LoadedChunks::new();
        assert!(!chunks.is_chunk_loaded(W, ChunkPos::new(0, 0)));
        chunks.load(W, ChunkPos::new(0, 0));
        assert!(chunks.is_chunk_loaded(W, ChunkPos::new(0, 0)));
        assert!(!chunks.is_chunk_loaded(WorldId(1), ChunkPos::new(0, 0)));
    }

    #[test]
    fn all_loaded_tracks_exceptions() {
        let chunks = LoadedChunks::all_loaded();
        let c = ChunkPos::new(3, -2);
        assert!(chunks.is_chunk_loaded(W, c));
        chunks.unload(W, c);
        assert!(!chunks.is_chunk_loaded(W, c));
        chunks.load(W, c);
        assert!(chunks.is_chunk_loaded(W, c));
    }

    #[test]
    fn clones_share_state_across_threads() {
        let chunks = LoadedChunks::new();
        let handle = chunks.clone();
        std::thread::spawn(move || {
            handle.set_block_loaded(W, BlockLocation::new(17, 0, 0), true);
        })
        .join()
        .unwrap();
        assert!(chunks.is_chunk_loaded(W, ChunkPos::new(1, 0)));
    }

    #[test]
    fn drop_log_records_and_sums() {
        let log = DropLog::new();
        let mut sink = log.clone();
        sink.drop_item(W, BlockLocation::new(0, 0, 0), ItemStack::new(ItemTypeId(1), 2));
        sink.drop_item(W, BlockLocation::new(0, 0, 0), ItemStack::new(ItemTypeId(1), 3));
        assert_eq!(log.drops().len(), 2);
        assert_eq!(log.total_quantity(), 5);
        log.clear();
        assert!(log.drops().is_empty());
    }

    #[test]
    fn sync_log_filters_by_observer() {
        let log = SyncLog::new();
        let mut b = log.clone();
        b.notify_remove(ObserverId(1), ItemId(4));
        b.notify_remove(ObserverId(2), ItemId(5));
        assert_eq!(log.events_for(ObserverId(2)), vec![SyncEvent::Remove(ItemId(5))]);
        assert_eq!(log.take().len(), 2);
        assert!(log.events().is_empty());
    }
}
