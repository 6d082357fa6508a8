//! Per-observer visibility synchronization.
//!
//! Each observer has a set of items it is currently shown. Every change to an
//! item (creation, movement, destruction) or to an observer (join, move,
//! duct shown/hidden) is diffed against that set and turns into queued
//! create/update/remove events. Events are queued in emission order and
//! flushed to a [`Broadcaster`] by the engine.
//!
//! An item is eligible for observer `P` when it is resident in the Future or
//! Active set of a loaded duct, `P` is in the same world, `P` has not hidden
//! that duct, and `P` is within render distance of the duct's block origin.
//! The shown set of every observer always equals its eligible set after an
//! operation completes.

use crate::fixed::Fixed64;
use crate::flow::ItemUnit;
use crate::id::{DuctId, ItemId, ObserverId, WorldId};
use crate::item::ItemStack;
use crate::location::{BlockLocation, Direction, Position};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Views and events
// ---------------------------------------------------------------------------

/// What an observer is told about an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemView {
    pub id: ItemId,
    pub duct: DuctId,
    pub world: WorldId,
    pub location: BlockLocation,
    pub direction: Direction,
    pub progress: Fixed64,
    pub stack: ItemStack,
}

impl ItemView {
    pub fn of(item: &ItemUnit, duct: DuctId) -> Self {
        Self {
            id: item.id,
            duct,
            world: item.world,
            location: item.location,
            direction: item.direction,
            progress: item.progress,
            stack: item.stack.clone(),
        }
    }
}

/// One protocol message for one observer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Create(ItemView),
    Update(ItemView),
    Remove(ItemId),
}

/// Delivers sync events to observers. Calls for one observer arrive in the
/// order the events were emitted.
pub trait Broadcaster: Send {
    fn notify_create(&mut self, observer: ObserverId, item: &ItemView);
    fn notify_update(&mut self, observer: ObserverId, item: &ItemView);
    fn notify_remove(&mut self, observer: ObserverId, item: ItemId);
}

/// Broadcaster that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn notify_create(&mut self, _: ObserverId, _: &ItemView) {}
    fn notify_update(&mut self, _: ObserverId, _: &ItemView) {}
    fn notify_remove(&mut self, _: ObserverId, _: ItemId) {}
}

// ---------------------------------------------------------------------------
// Observer state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Observer {
    world: WorldId,
    position: Position,
    shown: BTreeSet<ItemId>,
    hidden_ducts: BTreeSet<DuctId>,
}

impl Observer {
    fn new(world: WorldId, position: Position) -> Self {
        Self {
            world,
            position,
            shown: BTreeSet::new(),
            hidden_ducts: BTreeSet::new(),
        }
    }

    fn eligible(&self, view: &ItemView, resident: bool, radius: Fixed64) -> bool {
        resident
            && self.world == view.world
            && !self.hidden_ducts.contains(&view.duct)
            && self.position.within(&view.location.origin(), radius)
    }
}

// ---------------------------------------------------------------------------
// VisibilitySync
// ---------------------------------------------------------------------------

/// Tracks the shown set of every observer and queues the events that keep
/// clients consistent with it.
#[derive(Debug, Clone)]
pub struct VisibilitySync {
    observers: BTreeMap<ObserverId, Observer>,
    render_distance: Fixed64,
    outbox: Vec<(ObserverId, SyncEvent)>,
}

impl VisibilitySync {
    pub fn new(render_distance: Fixed64) -> Self {
        Self {
            observers: BTreeMap::new(),
            render_distance,
            outbox: Vec::new(),
        }
    }

    pub fn render_distance(&self) -> Fixed64 {
        self.render_distance
    }

    // -- Observers --

    /// Register an observer with an empty shown set. Returns `false` if the
    /// id was already registered (the existing entry is kept).
    pub fn add_observer(&mut self, id: ObserverId, world: WorldId, position: Position) -> bool {
        if self.observers.contains_key(&id) {
            return false;
        }
        self.observers.insert(id, Observer::new(world, position));
        true
    }

    /// Update an observer's location. The caller follows up with
    /// [`resync_observer`](Self::resync_observer).
    pub fn set_position(&mut self, id: ObserverId, world: WorldId, position: Position) -> bool {
        match self.observers.get_mut(&id) {
            Some(obs) => {
                obs.world = world;
                obs.position = position;
                true
            }
            None => false,
        }
    }

    /// Forget an observer. Nothing is emitted; queued events for it are
    /// discarded.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.outbox.retain(|(o, _)| *o != id);
        self.observers.remove(&id).is_some()
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.observers.contains_key(&id)
    }

    pub fn observer_location(&self, id: ObserverId) -> Option<(WorldId, Position)> {
        self.observers.get(&id).map(|o| (o.world, o.position))
    }

    pub fn shown(&self, id: ObserverId) -> Option<&BTreeSet<ItemId>> {
        self.observers.get(&id).map(|o| &o.shown)
    }

    pub fn is_shown(&self, id: ObserverId, item: ItemId) -> bool {
        self.observers
            .get(&id)
            .is_some_and(|o| o.shown.contains(&item))
    }

    // -- Item hooks --

    /// A new item appeared. `resident` is false when it landed somewhere
    /// that is never shown (an unloaded duct or its Unloaded bucket).
    pub fn on_item_created(&mut self, view: &ItemView, resident: bool) {
        let radius = self.render_distance;
        for (&id, obs) in self.observers.iter_mut() {
            if obs.eligible(view, resident, radius) && obs.shown.insert(view.id) {
                self.outbox.push((id, SyncEvent::Create(view.clone())));
            }
        }
    }

    /// An item changed position, duct, or residency.
    pub fn on_item_moved(&mut self, view: &ItemView, resident: bool) {
        let radius = self.render_distance;
        for (&id, obs) in self.observers.iter_mut() {
            let eligible = obs.eligible(view, resident, radius);
            let shown = obs.shown.contains(&view.id);
            match (eligible, shown) {
                (true, false) => {
                    obs.shown.insert(view.id);
                    self.outbox.push((id, SyncEvent::Create(view.clone())));
                }
                (false, true) => {
                    obs.shown.remove(&view.id);
                    self.outbox.push((id, SyncEvent::Remove(view.id)));
                }
                (true, true) => self.outbox.push((id, SyncEvent::Update(view.clone()))),
                (false, false) => {}
            }
        }
    }

    /// An item left the simulation.
    pub fn on_item_destroyed(&mut self, item: ItemId) {
        for (&id, obs) in self.observers.iter_mut() {
            if obs.shown.remove(&item) {
                self.outbox.push((id, SyncEvent::Remove(item)));
            }
        }
    }

    // -- Observer/duct hooks --

    /// The observer entered range of `duct`. `residents` are the duct's
    /// Future and Active items; `loaded` is the duct's load state.
    pub fn on_duct_shown<'a>(
        &mut self,
        observer: ObserverId,
        duct: DuctId,
        residents: impl IntoIterator<Item = &'a ItemView>,
        loaded: bool,
    ) -> bool {
        let radius = self.render_distance;
        let Some(obs) = self.observers.get_mut(&observer) else {
            return false;
        };
        obs.hidden_ducts.remove(&duct);
        for view in residents {
            if obs.eligible(view, loaded, radius) && obs.shown.insert(view.id) {
                self.outbox.push((observer, SyncEvent::Create(view.clone())));
            }
        }
        true
    }

    /// The observer left range of `duct`. `residents` are the ids in all
    /// three of the duct's sets. Only shown items produce a remove.
    pub fn on_duct_hidden(
        &mut self,
        observer: ObserverId,
        duct: DuctId,
        residents: impl IntoIterator<Item = ItemId>,
    ) -> bool {
        let Some(obs) = self.observers.get_mut(&observer) else {
            return false;
        };
        obs.hidden_ducts.insert(duct);
        for item in residents {
            if obs.shown.remove(&item) {
                self.outbox.push((observer, SyncEvent::Remove(item)));
            }
        }
        true
    }

    /// Re-establish an observer's shown set from scratch.
    ///
    /// `candidates` must include every resident item of every loaded duct
    /// near the observer; anything shown but absent is removed. Removes are
    /// emitted before creates, each in item id order.
    pub fn resync_observer<'a>(
        &mut self,
        observer: ObserverId,
        candidates: impl IntoIterator<Item = &'a ItemView>,
    ) -> bool {
        let radius = self.render_distance;
        let Some(obs) = self.observers.get_mut(&observer) else {
            return false;
        };

        let eligible: BTreeMap<ItemId, &ItemView> = candidates
            .into_iter()
            .filter(|v| obs.eligible(v, true, radius))
            .map(|v| (v.id, v))
            .collect();

        let stale: Vec<ItemId> = obs
            .shown
            .iter()
            .filter(|id| !eligible.contains_key(id))
            .copied()
            .collect();
        for item in stale {
            obs.shown.remove(&item);
            self.outbox.push((observer, SyncEvent::Remove(item)));
        }

        for (id, view) in eligible {
            if obs.shown.insert(id) {
                self.outbox.push((observer, SyncEvent::Create(view.clone())));
            }
        }
        true
    }

    /// Drop any per-duct state for a removed duct.
    pub fn forget_duct(&mut self, duct: DuctId) {
        for obs in self.observers.values_mut() {
            obs.hidden_ducts.remove(&duct);
        }
    }

    // -- Delivery --

    pub fn pending_events(&self) -> &[(ObserverId, SyncEvent)] {
        &self.outbox
    }

    pub fn drain_events(&mut self) -> Vec<(ObserverId, SyncEvent)> {
        std::mem::take(&mut self.outbox)
    }

    /// Send every queued event to `broadcaster`, in emission order.
    pub fn flush(&mut self, broadcaster: &mut dyn Broadcaster) {
        for (observer, event) in self.outbox.drain(..) {
            match &event {
                SyncEvent::Create(view) => broadcaster.notify_create(observer, view),
                SyncEvent::Update(view) => broadcaster.notify_update(observer, view),
                SyncEvent::Remove(id) => broadcaster.notify_remove(observer, *id),
            }
        }
    }
}
