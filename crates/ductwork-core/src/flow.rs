//! Item units and the per-duct advancement logic.
//!
//! An item enters a block at progress 0 on the face opposite its travel
//! direction. When it crosses the block centre (progress 0.5) the duct picks
//! its exit; at progress 1 it leaves through that exit. Advancing a duct is a
//! pure function of the duct's own state: items that leave are returned as
//! [`Exit`]s and the engine applies them to the destination.

use crate::duct::Duct;
use crate::fixed::{Fixed64, HALF, ONE};
use crate::id::{ContainerId, DuctId, ItemId, WorldId};
use crate::item::ItemStack;
use crate::location::{BlockLocation, Direction};
use crate::registry::{DeadEndPolicy, DuctKind};

// ---------------------------------------------------------------------------
// Item units
// ---------------------------------------------------------------------------

/// Which collection of its duct an item currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    Future,
    Active,
    Unloaded,
}

/// One in-transit payload plus its travel state.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUnit {
    pub id: ItemId,
    pub stack: ItemStack,
    pub world: WorldId,
    /// Block of the duct the item is resident in.
    pub location: BlockLocation,
    /// Travel direction. Before the centre this is the way in, after it the
    /// chosen exit.
    pub direction: Direction,
    /// Distance travelled through the current block, in `[0, 1)`.
    pub progress: Fixed64,
    pub state: ItemState,
    /// Waiting at the centre for an exit to appear.
    pub stalled: bool,
}

impl ItemUnit {
    pub fn new(
        id: ItemId,
        stack: ItemStack,
        world: WorldId,
        location: BlockLocation,
        direction: Direction,
        state: ItemState,
    ) -> Self {
        Self {
            id,
            stack,
            world,
            location,
            direction,
            progress: Fixed64::ZERO,
            state,
            stalled: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Advancement
// ---------------------------------------------------------------------------

/// Where a leaving item goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Into the Future set of the neighbouring duct.
    HandOff(DuctId),
    /// Into the adjacent container.
    Deliver(ContainerId),
    /// Destroyed at the centre of a sink duct.
    Void,
}

/// An item that left its duct this tick.
#[derive(Debug, Clone)]
pub struct Exit {
    pub item: ItemUnit,
    pub outcome: Outcome,
}

/// Result of advancing one duct for one tick.
#[derive(Debug, Clone, Default)]
pub struct Advance {
    /// Items that stayed in the duct and changed position.
    pub moved: Vec<ItemId>,
    pub exits: Vec<Exit>,
}

enum Step {
    Stay { moved: bool },
    Leave(Outcome),
}

/// Advance every Active item of `duct` by one tick.
///
/// Items that stay are kept in Active in their original order. Items that
/// reach an exit are removed and returned; the caller must place them.
pub fn advance_duct(duct: &mut Duct) -> Advance {
    let mut out = Advance::default();
    let active = std::mem::take(&mut duct.queues.active);
    let mut staying = Vec::with_capacity(active.len());

    for mut item in active {
        match step_item(duct, &mut item) {
            Step::Stay { moved } => {
                if moved {
                    out.moved.push(item.id);
                }
                staying.push(item);
            }
            Step::Leave(outcome) => out.exits.push(Exit { item, outcome }),
        }
    }

    duct.queues.active = staying;
    out
}

fn step_item(duct: &mut Duct, item: &mut ItemUnit) -> Step {
    let sink = duct.kind.capabilities().is_sink;

    if item.stalled {
        if sink {
            return Step::Leave(Outcome::Void);
        }
        match route(duct, item.direction) {
            Some(dir) => {
                item.direction = dir;
                item.stalled = false;
            }
            None => return Step::Stay { moved: false },
        }
    }

    let before = item.progress;
    item.progress = item.progress.saturating_add(duct.speed);

    if before < HALF && item.progress >= HALF {
        if sink {
            return Step::Leave(Outcome::Void);
        }
        match route(duct, item.direction) {
            Some(dir) => item.direction = dir,
            None => {
                item.progress = HALF;
                item.stalled = true;
                return Step::Stay {
                    moved: before != HALF,
                };
            }
        }
    }

    if item.progress >= ONE {
        if let Some(next) = duct.connection(item.direction) {
            item.progress -= ONE;
            return Step::Leave(Outcome::HandOff(next));
        }
        if let Some(container) = duct.container(item.direction) {
            return Step::Leave(Outcome::Deliver(container));
        }
        // Exit disappeared after routing; wait at the centre and re-route.
        item.progress = HALF;
        item.stalled = true;
    }

    Step::Stay { moved: true }
}

/// Choose the exit for an item travelling in `travel` at the block centre.
///
/// Routing ducts cycle round-robin over attached sides other than the way
/// back. Iron ducts only use their output side. When nothing qualifies the
/// kind's dead-end policy applies: `Reverse` sends the item back if that
/// side is attached, otherwise the item stalls.
pub fn route(duct: &mut Duct, travel: Direction) -> Option<Direction> {
    if !duct.kind.capabilities().can_route {
        return None;
    }
    if duct.kind == DuctKind::Iron {
        return duct.output.filter(|&d| duct.is_connected(d));
    }
    let back = travel.opposite();

    let dirs = Direction::all();
    for offset in 0..dirs.len() {
        let idx = (duct.rr_cursor + offset) % dirs.len();
        let dir = dirs[idx];
        if dir != back && duct.is_connected(dir) {
            duct.rr_cursor = (idx + 1) % dirs.len();
            return Some(dir);
        }
    }

    match duct.kind.dead_end() {
        DeadEndPolicy::Reverse if duct.is_connected(back) => Some(back),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{DuctTypeId, ItemTypeId};
    use crate::registry::{ConnectionRules, DuctTypeDef, DEFAULT_SPEED};
    use slotmap::SlotMap;

    fn def(kind: DuctKind, speed: Fixed64) -> DuctTypeDef {
        DuctTypeDef {
            name: "test".to_string(),
            class: "pipe".to_string(),
            kind,
            speed,
            drop: None,
            rules: ConnectionRules::default(),
        }
    }

    fn duct(kind: DuctKind) -> Duct {
        Duct::new(
            WorldId(0),
            BlockLocation::new(0, 0, 0),
            DuctTypeId(0),
            &def(kind, DEFAULT_SPEED),
            true,
        )
    }

    fn neighbor_ids(n: usize) -> Vec<DuctId> {
        let mut sm: SlotMap<DuctId, ()> = SlotMap::with_key();
        (0..n).map(|_| sm.insert(())).collect()
    }

    fn container_id() -> ContainerId {
        let mut sm: SlotMap<ContainerId, ()> = SlotMap::with_key();
        sm.insert(())
    }

    fn active_item(id: u64, dir: Direction) -> ItemUnit {
        ItemUnit::new(
            ItemId(id),
            ItemStack::new(ItemTypeId(1), 1),
            WorldId(0),
            BlockLocation::new(0, 0, 0),
            dir,
            ItemState::Active,
        )
    }

    fn run_until_exit(duct: &mut Duct, max_ticks: usize) -> Option<(usize, Exit)> {
        for t in 1..=max_ticks {
            let mut adv = advance_duct(duct);
            if let Some(exit) = adv.exits.pop() {
                return Some((t, exit));
            }
        }
        None
    }

    #[test]
    fn straight_pipe_hands_off_after_eight_ticks() {
        let ids = neighbor_ids(2);
        let mut d = duct(DuctKind::Plain);
        d.connections[Direction::West.index()] = Some(ids[0]);
        d.connections[Direction::East.index()] = Some(ids[1]);
        d.queues.active.push(active_item(1, Direction::East));

        let (ticks, exit) = run_until_exit(&mut d, 20).unwrap();
        assert_eq!(ticks, 8);
        assert_eq!(exit.outcome, Outcome::HandOff(ids[1]));
        assert_eq!(exit.item.progress, Fixed64::ZERO);
        assert!(d.queues.active.is_empty());
    }

    #[test]
    fn moving_items_are_reported() {
        let ids = neighbor_ids(1);
        let mut d = duct(DuctKind::Plain);
        d.connections[Direction::East.index()] = Some(ids[0]);
        d.queues.active.push(active_item(7, Direction::East));

        let adv = advance_duct(&mut d);
        assert_eq!(adv.moved, vec![ItemId(7)]);
        assert_eq!(d.queues.active[0].progress, DEFAULT_SPEED);
    }

    #[test]
    fn container_exit_delivers() {
        let c = container_id();
        let mut d = duct(DuctKind::Plain);
        d.container_connections[Direction::Up.index()] = Some(c);
        d.queues.active.push(active_item(1, Direction::Up));

        let (_, exit) = run_until_exit(&mut d, 20).unwrap();
        assert_eq!(exit.outcome, Outcome::Deliver(c));
    }

    #[test]
    fn dead_end_reverses_when_way_back_is_connected() {
        let ids = neighbor_ids(1);
        let mut d = duct(DuctKind::Plain);
        // Item travels East, only West (the way back) is attached.
        d.connections[Direction::West.index()] = Some(ids[0]);
        d.queues.active.push(active_item(1, Direction::East));

        let (_, exit) = run_until_exit(&mut d, 20).unwrap();
        assert_eq!(exit.outcome, Outcome::HandOff(ids[0]));
        assert_eq!(exit.item.direction, Direction::West);
    }

    #[test]
    fn isolated_duct_stalls_at_centre() {
        let mut d = duct(DuctKind::Plain);
        d.queues.active.push(active_item(1, Direction::East));

        assert!(run_until_exit(&mut d, 30).is_none());
        let item = &d.queues.active[0];
        assert!(item.stalled);
        assert_eq!(item.progress, HALF);

        // A stalled item does not report movement.
        assert!(advance_duct(&mut d).moved.is_empty());
    }

    #[test]
    fn stalled_item_resumes_when_exit_appears() {
        let ids = neighbor_ids(1);
        let mut d = duct(DuctKind::Plain);
        d.queues.active.push(active_item(1, Direction::East));
        assert!(run_until_exit(&mut d, 10).is_none());

        d.connections[Direction::North.index()] = Some(ids[0]);
        let (_, exit) = run_until_exit(&mut d, 10).unwrap();
        assert_eq!(exit.outcome, Outcome::HandOff(ids[0]));
        assert_eq!(exit.item.direction, Direction::North);
        assert!(!exit.item.stalled);
    }

    #[test]
    fn round_robin_alternates_exits() {
        let ids = neighbor_ids(3);
        let mut d = duct(DuctKind::Plain);
        d.connections[Direction::West.index()] = Some(ids[0]);
        d.connections[Direction::North.index()] = Some(ids[1]);
        d.connections[Direction::South.index()] = Some(ids[2]);

        let mut exits = Vec::new();
        for round in 0..4 {
            d.queues.active.push(active_item(round, Direction::East));
            let (_, exit) = run_until_exit(&mut d, 20).unwrap();
            exits.push(exit.item.direction);
        }
        assert_eq!(
            exits,
            vec![
                Direction::North,
                Direction::South,
                Direction::North,
                Direction::South
            ]
        );
    }

    #[test]
    fn iron_uses_output_side_only() {
        let ids = neighbor_ids(3);
        let mut d = duct(DuctKind::Iron);
        d.connections[Direction::West.index()] = Some(ids[0]);
        d.connections[Direction::North.index()] = Some(ids[1]);
        d.connections[Direction::South.index()] = Some(ids[2]);
        d.output = Some(Direction::South);

        d.queues.active.push(active_item(1, Direction::East));
        let (_, exit) = run_until_exit(&mut d, 20).unwrap();
        assert_eq!(exit.outcome, Outcome::HandOff(ids[2]));
    }

    #[test]
    fn iron_without_output_stalls_instead_of_reversing() {
        let ids = neighbor_ids(1);
        let mut d = duct(DuctKind::Iron);
        d.connections[Direction::West.index()] = Some(ids[0]);
        d.queues.active.push(active_item(1, Direction::East));

        assert!(run_until_exit(&mut d, 20).is_none());
        assert!(d.queues.active[0].stalled);
    }

    #[test]
    fn non_routing_ducts_pick_no_exit() {
        let ids = neighbor_ids(2);
        let mut d = duct(DuctKind::Void);
        d.connections[Direction::East.index()] = Some(ids[0]);
        d.connections[Direction::West.index()] = Some(ids[1]);
        assert_eq!(route(&mut d, Direction::East), None);
        assert_eq!(d.rr_cursor, 0);
    }

    #[test]
    fn void_destroys_at_centre() {
        let ids = neighbor_ids(1);
        let mut d = duct(DuctKind::Void);
        d.connections[Direction::East.index()] = Some(ids[0]);
        d.queues.active.push(active_item(1, Direction::East));

        let (ticks, exit) = run_until_exit(&mut d, 20).unwrap();
        assert_eq!(ticks, 4);
        assert_eq!(exit.outcome, Outcome::Void);
    }

    #[test]
    fn vanished_exit_sends_item_back_to_centre() {
        let ids = neighbor_ids(1);
        let mut d = duct(DuctKind::Plain);
        d.connections[Direction::East.index()] = Some(ids[0]);
        d.queues.active.push(active_item(1, Direction::East));
        // Past the centre, exit chosen.
        for _ in 0..5 {
            advance_duct(&mut d);
        }
        d.connections[Direction::East.index()] = None;
        for _ in 0..3 {
            assert!(advance_duct(&mut d).exits.is_empty());
        }
        let item = &d.queues.active[0];
        assert!(item.stalled);
        assert_eq!(item.progress, HALF);
    }

    #[test]
    fn fast_duct_hands_off_with_remainder() {
        let ids = neighbor_ids(1);
        let speed = Fixed64::from_num(0.375);
        let mut d = Duct::new(
            WorldId(0),
            BlockLocation::new(0, 0, 0),
            DuctTypeId(0),
            &def(DuctKind::Plain, speed),
            true,
        );
        d.connections[Direction::East.index()] = Some(ids[0]);
        d.queues.active.push(active_item(1, Direction::East));

        let (ticks, exit) = run_until_exit(&mut d, 10).unwrap();
        assert_eq!(ticks, 3);
        assert_eq!(exit.item.progress, Fixed64::from_num(0.125));
    }
}
