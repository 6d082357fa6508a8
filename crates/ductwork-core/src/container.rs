//! Containers: item sources and sinks attached to ducts.
//!
//! The engine reaches a container only through [`ContainerAdapter`]. All
//! `face` arguments name the side of the container the items cross, i.e.
//! the side facing the duct.

use crate::id::{ItemTypeId, WorldId};
use crate::item::{InventorySlot, ItemStack};
use crate::location::{BlockLocation, ChunkPos, Direction};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// Access to a storage block from the flow engine.
pub trait ContainerAdapter: Send + fmt::Debug {
    /// Remove up to `quantity` units through `face`. `None` if empty or if
    /// that side does not give items out.
    fn extract(&mut self, face: Direction, quantity: u32) -> Option<ItemStack>;

    /// Store `stack` through `face`. Returns whatever did not fit.
    fn insert(&mut self, face: Direction, stack: ItemStack) -> Option<ItemStack>;

    /// Whether the container itself is ready. Combined with the chunk
    /// predicate by the engine.
    fn is_loaded(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// StorageContainer
// ---------------------------------------------------------------------------

/// A bounded chest backed by an [`InventorySlot`].
///
/// Cloning yields another handle to the same inventory, so the host can keep
/// one handle while the engine owns the other.
#[derive(Debug, Clone)]
pub struct StorageContainer {
    slot: Arc<Mutex<InventorySlot>>,
    /// Sides that refuse extraction.
    locked_faces: Vec<Direction>,
}

impl StorageContainer {
    pub fn new(capacity: u32) -> Self {
        Self {
            slot: Arc::new(Mutex::new(InventorySlot::new(capacity))),
            locked_faces: Vec::new(),
        }
    }

    /// A container pre-filled with `quantity` units of `item_type`. Anything
    /// over capacity is discarded.
    pub fn with_items(capacity: u32, item_type: ItemTypeId, quantity: u32) -> Self {
        let container = Self::new(capacity);
        let _ = container.slot.lock().add(item_type, quantity);
        container
    }

    /// Refuse extraction through `face`. Insertion is still accepted.
    pub fn lock_face(mut self, face: Direction) -> Self {
        self.locked_faces.push(face);
        self
    }

    pub fn total(&self) -> u32 {
        self.slot.lock().total()
    }

    pub fn quantity(&self, item_type: ItemTypeId) -> u32 {
        self.slot.lock().quantity(item_type)
    }

    pub fn contents(&self) -> Vec<ItemStack> {
        self.slot.lock().stacks.clone()
    }
}

impl ContainerAdapter for StorageContainer {
    fn extract(&mut self, face: Direction, quantity: u32) -> Option<ItemStack> {
        if self.locked_faces.contains(&face) {
            return None;
        }
        self.slot.lock().take_first(quantity)
    }

    fn insert(&mut self, _face: Direction, stack: ItemStack) -> Option<ItemStack> {
        let overflow = self.slot.lock().add(stack.item_type, stack.quantity);
        (overflow > 0).then(|| ItemStack::new(stack.item_type, overflow))
    }
}

// ---------------------------------------------------------------------------
// Engine-side record
// ---------------------------------------------------------------------------

/// A container registered with the engine.
#[derive(Debug)]
pub struct ContainerEntry {
    pub world: WorldId,
    pub location: BlockLocation,
    pub chunk: ChunkPos,
    pub adapter: Box<dyn ContainerAdapter>,
    /// Stacks that arrived while the container was unloaded, with the face
    /// they arrived through. Drained newest first.
    pub unloaded_items: Vec<(Direction, ItemStack)>,
    /// Load state sampled at the start of the current tick.
    pub loaded: bool,
}

impl ContainerEntry {
    pub fn new(
        world: WorldId,
        location: BlockLocation,
        adapter: Box<dyn ContainerAdapter>,
        loaded: bool,
    ) -> Self {
        Self {
            world,
            location,
            chunk: location.chunk(),
            adapter,
            unloaded_items: Vec::new(),
            loaded,
        }
    }

    /// Units waiting in the unloaded queue.
    pub fn pending_quantity(&self) -> u32 {
        self.unloaded_items.iter().map(|(_, s)| s.quantity).sum()
    }
}
