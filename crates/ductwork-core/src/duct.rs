use crate::fixed::Fixed64;
use crate::flow::{ItemState, ItemUnit};
use crate::id::{ContainerId, DuctId, DuctTypeId, ItemId, WorldId};
use crate::location::{BlockLocation, ChunkPos, Direction};
use crate::registry::{DuctKind, DuctTypeDef};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Item queues
// ---------------------------------------------------------------------------

/// The three item collections of a duct.
///
/// `future` holds items created or handed in during the current tick,
/// `active` holds items that move this tick, and `unloaded` holds items that
/// arrived while the duct's chunk was unloaded. An item lives in exactly one
/// of these collections of exactly one duct.
#[derive(Debug, Clone, Default)]
pub struct ItemQueues {
    pub future: Vec<ItemUnit>,
    pub active: Vec<ItemUnit>,
    pub unloaded: Vec<ItemUnit>,
}

impl ItemQueues {
    pub fn len(&self) -> usize {
        self.future.len() + self.active.len() + self.unloaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move every Future item with an id below `fence` into Active. Items
    /// created at or after the fence stay in Future. Returns the number
    /// promoted.
    pub fn promote_future(&mut self, fence: ItemId) -> usize {
        let before = self.active.len();
        let (promote, held): (Vec<ItemUnit>, Vec<ItemUnit>) =
            self.future.drain(..).partition(|item| item.id < fence);
        self.future = held;
        for mut item in promote {
            item.state = ItemState::Active;
            self.active.push(item);
        }
        self.active.len() - before
    }

    /// Pop up to `limit` items from the Unloaded bucket (newest first) into
    /// Active. Returns the ids reactivated.
    pub fn reactivate(&mut self, limit: u32) -> Vec<ItemId> {
        let mut ids = Vec::new();
        for _ in 0..limit {
            let Some(mut item) = self.unloaded.pop() else {
                break;
            };
            item.state = ItemState::Active;
            ids.push(item.id);
            self.active.push(item);
        }
        ids
    }

    /// Insert an item into the bucket named by its state.
    pub fn push(&mut self, item: ItemUnit) {
        match item.state {
            ItemState::Future => self.future.push(item),
            ItemState::Active => self.active.push(item),
            ItemState::Unloaded => self.unloaded.push(item),
        }
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemUnit> {
        self.iter().find(|item| item.id == id)
    }

    /// All resident items: Future, then Active, then Unloaded.
    pub fn iter(&self) -> impl Iterator<Item = &ItemUnit> {
        self.future
            .iter()
            .chain(self.active.iter())
            .chain(self.unloaded.iter())
    }

    /// Items an observer may see: Future and Active residents.
    pub fn visible(&self) -> impl Iterator<Item = &ItemUnit> {
        self.future.iter().chain(self.active.iter())
    }

    /// Empty every bucket, returning the items in `iter()` order.
    pub fn drain_all(&mut self) -> Vec<ItemUnit> {
        let mut out = Vec::with_capacity(self.len());
        out.append(&mut self.future);
        out.append(&mut self.active);
        out.append(&mut self.unloaded);
        out
    }
}

// ---------------------------------------------------------------------------
// Duct
// ---------------------------------------------------------------------------

/// A placed duct segment.
#[derive(Debug, Clone)]
pub struct Duct {
    pub world: WorldId,
    pub location: BlockLocation,
    pub chunk: ChunkPos,
    pub duct_type: DuctTypeId,
    pub kind: DuctKind,
    pub speed: Fixed64,
    /// Connected neighbour duct per direction, indexed by [`Direction::index`].
    pub connections: [Option<DuctId>; 6],
    /// Adjacent container per direction.
    pub container_connections: [Option<ContainerId>; 6],
    /// Manually blocked directions. No edge is realized through these.
    pub blocked: BTreeSet<Direction>,
    /// Output side for ducts that send everything one way.
    pub output: Option<Direction>,
    /// Round-robin position for routing, as a direction index.
    pub rr_cursor: usize,
    /// Chunk load state. Sampled at the start of every tick and again when
    /// an operation between ticks reads the duct's visibility.
    pub loaded: bool,
    pub queues: ItemQueues,
}

impl Duct {
    pub fn new(
        world: WorldId,
        location: BlockLocation,
        duct_type: DuctTypeId,
        def: &DuctTypeDef,
        loaded: bool,
    ) -> Self {
        Self {
            world,
            location,
            chunk: location.chunk(),
            duct_type,
            kind: def.kind,
            speed: def.speed,
            connections: [None; 6],
            container_connections: [None; 6],
            blocked: BTreeSet::new(),
            output: None,
            rr_cursor: 0,
            loaded,
            queues: ItemQueues::default(),
        }
    }

    pub fn connection(&self, dir: Direction) -> Option<DuctId> {
        self.connections[dir.index()]
    }

    pub fn container(&self, dir: Direction) -> Option<ContainerId> {
        self.container_connections[dir.index()]
    }

    /// Whether anything (duct or container) is attached on `dir`.
    pub fn is_connected(&self, dir: Direction) -> bool {
        self.connection(dir).is_some() || self.container(dir).is_some()
    }

    pub fn is_blocked(&self, dir: Direction) -> bool {
        self.blocked.contains(&dir)
    }

    /// Directions with an attached neighbour, in direction order.
    pub fn connected_directions(&self) -> Vec<Direction> {
        Direction::all()
            .into_iter()
            .filter(|&d| self.is_connected(d))
            .collect()
    }

    pub fn item_count(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ItemTypeId;
    use crate::item::ItemStack;

    fn item(id: u64, state: ItemState) -> ItemUnit {
        ItemUnit::new(
            ItemId(id),
            ItemStack::new(ItemTypeId(0), 1),
            WorldId(0),
            BlockLocation::new(0, 0, 0),
            Direction::East,
            state,
        )
    }

    #[test]
    fn promote_moves_all_future_items() {
        let mut q = ItemQueues::default();
        q.push(item(1, ItemState::Future));
        q.push(item(2, ItemState::Future));
        assert_eq!(q.promote_future(ItemId(u64::MAX)), 2);
        assert!(q.future.is_empty());
        assert!(q.active.iter().all(|i| i.state == ItemState::Active));
    }

    #[test]
    fn promote_holds_items_past_the_fence() {
        let mut q = ItemQueues::default();
        q.push(item(3, ItemState::Future));
        q.push(item(7, ItemState::Future));
        q.push(item(4, ItemState::Future));
        assert_eq!(q.promote_future(ItemId(5)), 2);
        let held: Vec<ItemId> = q.future.iter().map(|i| i.id).collect();
        assert_eq!(held, vec![ItemId(7)]);
        let active: Vec<ItemId> = q.active.iter().map(|i| i.id).collect();
        assert_eq!(active, vec![ItemId(3), ItemId(4)]);
    }

    #[test]
    fn reactivate_is_rate_limited_and_lifo() {
        let mut q = ItemQueues::default();
        for id in 1..=5 {
            q.push(item(id, ItemState::Unloaded));
        }
        assert_eq!(q.reactivate(1), vec![ItemId(5)]);
        assert_eq!(q.unloaded.len(), 4);
        assert_eq!(q.active.len(), 1);
        assert_eq!(q.reactivate(0), Vec::<ItemId>::new());
    }

    #[test]
    fn drain_all_empties_every_bucket() {
        let mut q = ItemQueues::default();
        q.push(item(1, ItemState::Future));
        q.push(item(2, ItemState::Active));
        q.push(item(3, ItemState::Unloaded));
        let drained: Vec<ItemId> = q.drain_all().into_iter().map(|i| i.id).collect();
        assert_eq!(drained, vec![ItemId(1), ItemId(2), ItemId(3)]);
        assert!(q.is_empty());
    }

    #[test]
    fn visible_excludes_unloaded() {
        let mut q = ItemQueues::default();
        q.push(item(1, ItemState::Future));
        q.push(item(2, ItemState::Unloaded));
        let ids: Vec<ItemId> = q.visible().map(|i| i.id).collect();
        assert_eq!(ids, vec![ItemId(1)]);
        assert!(q.get(ItemId(2)).is_some());
    }
}
