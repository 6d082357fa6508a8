//! Read-only query API for inspecting simulation state.
//!
//! Snapshot types are owned copies with no references into engine storage,
//! suitable for rendering, debugging overlays and tests.

use crate::container::ContainerEntry;
use crate::duct::{Duct, ItemQueues};
use crate::engine::Engine;
use crate::fixed::{Fixed64, Ticks};
use crate::flow::{ItemState, ItemUnit};
use crate::id::{ContainerId, DuctId, DuctTypeId, ItemId, ObserverId, WorldId};
use crate::item::ItemStack;
use crate::location::{BlockLocation, Direction};
use crate::resolver::Connections;
use crate::sim::StateHash;

// ---------------------------------------------------------------------------
// Duct snapshot
// ---------------------------------------------------------------------------

/// An aggregated, read-only view of a single duct.
#[derive(Debug, Clone, PartialEq)]
pub struct DuctSnapshot {
    pub id: DuctId,
    pub world: WorldId,
    pub location: BlockLocation,
    pub duct_type: DuctTypeId,
    /// Load state sampled at the last tick.
    pub loaded: bool,
    /// Sides with a duct or container attached.
    pub connected: Vec<Direction>,
    pub blocked: Vec<Direction>,
    pub output: Option<Direction>,
    /// Items in Future, Active and Unloaded, in that order.
    pub items: Vec<ItemSnapshot>,
}

/// One item as seen from outside the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub stack: ItemStack,
    pub direction: Direction,
    pub progress: Fixed64,
    pub state: ItemState,
    pub stalled: bool,
}

impl From<&ItemUnit> for ItemSnapshot {
    fn from(item: &ItemUnit) -> Self {
        Self {
            id: item.id,
            stack: item.stack.clone(),
            direction: item.direction,
            progress: item.progress,
            state: item.state,
            stalled: item.stalled,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine queries
// ---------------------------------------------------------------------------

impl Engine {
    pub fn duct_at(&self, world: WorldId, location: BlockLocation) -> Option<DuctId> {
        self.spatial.duct_at(world, location)
    }

    pub fn container_at(&self, world: WorldId, location: BlockLocation) -> Option<ContainerId> {
        self.spatial.container_at(world, location)
    }

    pub fn duct(&self, id: DuctId) -> Option<&Duct> {
        self.ducts.get(id)
    }

    pub fn container(&self, id: ContainerId) -> Option<&ContainerEntry> {
        self.containers.get(id)
    }

    /// The resolved connections of a duct.
    pub fn connections(&self, id: DuctId) -> Option<Connections> {
        self.ducts.get(id).map(|d| Connections {
            ducts: d.connections,
            containers: d.container_connections,
        })
    }

    /// Look up a live item wherever it is.
    pub fn item(&self, id: ItemId) -> Option<&ItemUnit> {
        let duct = self.item_index.get(&id)?;
        self.ducts.get(*duct)?.queues.get(id)
    }

    /// The duct currently holding an item.
    pub fn item_duct(&self, id: ItemId) -> Option<DuctId> {
        self.item_index.get(&id).copied()
    }

    pub fn items_in(&self, duct: DuctId) -> Option<&ItemQueues> {
        self.ducts.get(duct).map(|d| &d.queues)
    }

    /// Number of live items in all ducts.
    pub fn item_count(&self) -> usize {
        self.item_index.len()
    }

    /// Total units carried by ducts, in any state.
    pub fn payload_in_transit(&self) -> u64 {
        self.ducts
            .values()
            .flat_map(|d| d.queues.iter())
            .map(|i| u64::from(i.stack.quantity))
            .sum()
    }

    /// Units waiting for an unloaded container.
    pub fn pending_unloaded(&self, container: ContainerId) -> Option<u32> {
        self.containers.get(container).map(|c| c.pending_quantity())
    }

    /// Items currently shown to an observer, in id order.
    pub fn shown_items(&self, observer: ObserverId) -> Option<Vec<ItemId>> {
        self.visibility
            .shown(observer)
            .map(|s| s.iter().copied().collect())
    }

    pub fn duct_count(&self) -> usize {
        self.ducts.len()
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Ticks completed so far.
    pub fn tick_count(&self) -> Ticks {
        self.sim_state.tick
    }

    pub fn duct_snapshot(&self, id: DuctId) -> Option<DuctSnapshot> {
        let d = self.ducts.get(id)?;
        Some(DuctSnapshot {
            id,
            world: d.world,
            location: d.location,
            duct_type: d.duct_type,
            loaded: d.loaded,
            connected: d.connected_directions(),
            blocked: d.blocked.iter().copied().collect(),
            output: d.output,
            items: d.queues.iter().map(ItemSnapshot::from).collect(),
        })
    }

    /// Snapshots of every duct in a world, in spatial order.
    pub fn snapshot_world(&self, world: WorldId) -> Vec<DuctSnapshot> {
        self.spatial
            .iter_ducts()
            .filter(|(w, _, _)| *w == world)
            .filter_map(|(_, _, id)| self.duct_snapshot(id))
            .collect()
    }

    /// Deterministic hash over the tick counter, every duct in spatial
    /// order with its items, and every container's pending queue.
    ///
    /// Two engines fed the same operations produce the same hash.
    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.sim_state.tick);

        for (world, location, id) in self.spatial.iter_ducts() {
            let Some(duct) = self.ducts.get(id) else {
                continue;
            };
            h.write_block(world, location);
            h.write_u32(duct.duct_type.0);
            h.write(&[duct.loaded as u8, duct.rr_cursor as u8]);
            for item in duct.queues.iter() {
                h.write_u64(item.id.0);
                h.write_stack(&item.stack);
                h.write_direction(item.direction);
                h.write(&[item.state as u8, item.stalled as u8]);
                h.write_fixed64(item.progress);
            }
        }

        for (world, location, id) in self.spatial.iter_containers() {
            let Some(container) = self.containers.get(id) else {
                continue;
            };
            h.write_block(world, location);
            for (face, stack) in &container.unloaded_items {
                h.write_direction(*face);
                h.write_stack(stack);
            }
        }
        h.finish()
    }
}
