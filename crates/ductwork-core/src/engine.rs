//! The simulation engine: owns every duct, container, item and observer and
//! runs the tick pipeline.
//!
//! # Architecture
//!
//! The `Engine` is the simulation context of one world set. It is owned by
//! exactly one execution context (the tick thread or the caller) and every
//! mutation goes through `&mut Engine`. Other contexts queue [`Command`]s
//! (directly, or through a [`TickDriver`](crate::tick_thread::TickDriver))
//! and share chunk load state through a [`ChunkLoader`].
//!
//! The `Engine` owns:
//! - Ducts and containers in `SlotMap` arenas, addressed through a
//!   [`SpatialIndex`]
//! - An item index mapping each live item to the duct holding it
//! - A [`VisibilitySync`] with the shown set of every observer
//! - An [`EventBus`], a [`CommandQueue`] and a [`DirtyTracker`]
//!
//! # Tick Pipeline
//!
//! Each `tick()` runs:
//! 1. **Pre-tick** -- apply queued commands, resolve dirty connections
//! 2. **Load refresh** -- sample chunk state; hide/reveal flipped ducts
//! 3. **Promotion** -- Future -> Active everywhere; on extraction ticks,
//!    rate-limited Unloaded -> Active
//! 4. **Extraction** (every Nth tick) -- pull from containers into Future,
//!    then retry one queued stack per container
//! 5. **Movement** -- advance Active items in every loaded duct, apply
//!    hand-offs, deliveries and voids, then the overflow guard
//! 6. **Post-tick** -- deliver events, queue reactive commands, flush
//!    visibility events to the broadcaster
//! 7. **Bookkeeping** -- advance the tick counter
//!
//! All promotions of a tick happen before any movement, so an item that
//! arrives in a duct's Future set is never advanced in the same tick. Items
//! created by commands applied in pre-tick are held in Future past this
//! tick's promotion.

use crate::command::{Command, CommandKind, CommandQueue};
use crate::config::{ConfigError, EngineConfig};
use crate::container::{ContainerAdapter, ContainerEntry};
use crate::dirty::DirtyTracker;
use crate::duct::Duct;
use crate::error::{EngineError, TickError};
use crate::event::{Event, EventBus, EventKind, PassiveListener, ReactiveHandler};
use crate::fixed::Ticks;
use crate::flow::{self, Exit, ItemState, ItemUnit, Outcome};
use crate::host::{ChunkLoader, DiscardDrops, DropSink, LoadedChunks};
use crate::id::{ContainerId, DuctId, DuctTypeId, ItemId, ObserverId, WorldId};
use crate::item::ItemStack;
use crate::location::{BlockLocation, Direction, Position};
use crate::registry::{DuctKind, Registry};
use crate::resolver;
use crate::sim::{SimState, TickReport};
use crate::spatial::{SpatialError, SpatialIndex};
use crate::visibility::{Broadcaster, ItemView, NullBroadcaster, VisibilitySync};
use slotmap::SlotMap;
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The duct simulation engine.
pub struct Engine {
    registry: Arc<Registry>,
    config: EngineConfig,

    /// Simulation state (tick counter).
    pub sim_state: SimState,

    pub(crate) ducts: SlotMap<DuctId, Duct>,
    pub(crate) containers: SlotMap<ContainerId, ContainerEntry>,
    pub(crate) spatial: SpatialIndex,
    /// Which duct holds each live item.
    pub(crate) item_index: BTreeMap<ItemId, DuctId>,
    pub(crate) visibility: VisibilitySync,

    commands: CommandQueue,
    dirty: DirtyTracker,
    event_bus: EventBus,

    // -- Host collaborators --
    chunks: Arc<dyn ChunkLoader>,
    drops: Box<dyn DropSink>,
    broadcaster: Box<dyn Broadcaster>,

    next_item_id: u64,
    last_report: TickReport,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sim_state", &self.sim_state)
            .field("config", &self.config)
            .field("ducts", &self.ducts.len())
            .field("containers", &self.containers.len())
            .field("items", &self.item_index.len())
            .field("pending_commands", &self.commands.pending_count())
            .field("next_item_id", &self.next_item_id)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine. Every chunk counts as loaded and drops and sync
    /// events are discarded until the host installs its own collaborators.
    pub fn new(registry: impl Into<Arc<Registry>>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: registry.into(),
            sim_state: SimState::new(),
            ducts: SlotMap::with_key(),
            containers: SlotMap::with_key(),
            spatial: SpatialIndex::new(),
            item_index: BTreeMap::new(),
            visibility: VisibilitySync::new(config.render_distance_fixed()),
            commands: CommandQueue::with_max_history(config.command_history),
            dirty: DirtyTracker::new(),
            event_bus: EventBus::new(config.event_buffer_capacity),
            chunks: Arc::new(LoadedChunks::all_loaded()),
            drops: Box::new(DiscardDrops),
            broadcaster: Box::new(NullBroadcaster),
            next_item_id: 1,
            last_report: TickReport::default(),
            config,
        })
    }

    /// Use `loader` for chunk load state. Takes effect at the next tick.
    pub fn with_chunk_loader(mut self, loader: impl ChunkLoader + 'static) -> Self {
        self.chunks = Arc::new(loader);
        self
    }

    pub fn with_drop_sink(mut self, sink: impl DropSink + 'static) -> Self {
        self.drops = Box::new(sink);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: impl Broadcaster + 'static) -> Self {
        self.broadcaster = Box::new(broadcaster);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The tick that is running, or the next one to run between ticks.
    fn current_tick(&self) -> Ticks {
        self.sim_state.tick + 1
    }

    // -----------------------------------------------------------------------
    // Topology
    // -----------------------------------------------------------------------

    /// Place a duct and connect it to its neighbours.
    pub fn place_duct(
        &mut self,
        world: WorldId,
        location: BlockLocation,
        duct_type: DuctTypeId,
    ) -> Result<DuctId, EngineError> {
        let def = self
            .registry
            .get(duct_type)
            .ok_or(EngineError::UnknownDuctType(duct_type))?;
        if self.spatial.is_occupied(world, location) {
            return Err(EngineError::LocationOccupied { world, location });
        }

        let loaded = self.chunks.is_chunk_loaded(world, location.chunk());
        let id = self
            .ducts
            .insert(Duct::new(world, location, duct_type, def, loaded));
        if let Err(e) = self.spatial.place_duct(world, location, id) {
            self.ducts.remove(id);
            return Err(e.into());
        }

        log::debug!("placed {} duct at {location:?} in {world:?}", def.name);
        let tick = self.current_tick();
        self.dirty.mark_duct(id);
        self.dirty
            .mark_ducts(self.spatial.neighbor_ducts(world, location).into_iter().map(|(_, d)| d));
        self.event_bus.emit(Event::DuctPlaced {
            duct: id,
            duct_type,
            tick,
        });
        self.resolve_dirty();
        Ok(id)
    }

    /// Remove a duct. Returns its drop list: the duct's own drop, then every
    /// resident payload (Future, Active, Unloaded).
    pub fn remove_duct(
        &mut self,
        world: WorldId,
        location: BlockLocation,
    ) -> Result<Vec<ItemStack>, EngineError> {
        let id = self.spatial.remove_duct(world, location)?;
        let mut duct = self.ducts.remove(id).ok_or(EngineError::DuctNotFound(id))?;

        let mut drops: Vec<ItemStack> = self.registry.on_destroy(duct.duct_type).into_iter().collect();
        for item in duct.queues.drain_all() {
            self.item_index.remove(&item.id);
            self.visibility.on_item_destroyed(item.id);
            drops.push(item.stack);
        }
        self.visibility.forget_duct(id);

        log::debug!("removed duct at {location:?} in {world:?}, {} drops", drops.len());
        let tick = self.current_tick();
        self.dirty
            .mark_ducts(self.spatial.neighbor_ducts(world, location).into_iter().map(|(_, d)| d));
        self.event_bus.emit(Event::DuctRemoved { duct: id, tick });
        self.resolve_dirty();
        self.flush_sync();
        Ok(drops)
    }

    /// Block or unblock one side of a duct. Both ducts on that side are
    /// re-resolved.
    pub fn set_blocked(&mut self, duct: DuctId, direction: Direction, blocked: bool) -> Result<(), EngineError> {
        let d = self.ducts.get_mut(duct).ok_or(EngineError::DuctNotFound(duct))?;
        if blocked {
            d.blocked.insert(direction);
        } else {
            d.blocked.remove(&direction);
        }
        let (world, location) = (d.world, d.location);

        self.dirty.mark_duct(duct);
        if let Some(other) = self.spatial.neighbor_duct(world, location, direction) {
            self.dirty.mark_duct(other);
        }
        self.resolve_dirty();
        Ok(())
    }

    /// Choose the output side of an iron duct. Other kinds route on their
    /// own and are rejected.
    pub fn set_output_direction(&mut self, duct: DuctId, direction: Option<Direction>) -> Result<(), EngineError> {
        let d = self.ducts.get_mut(duct).ok_or(EngineError::DuctNotFound(duct))?;
        if d.kind != DuctKind::Iron {
            return Err(EngineError::NoOutputSide(duct));
        }
        d.output = direction;
        Ok(())
    }

    /// Register a container and attach it to adjacent ducts.
    pub fn add_container(
        &mut self,
        world: WorldId,
        location: BlockLocation,
        adapter: Box<dyn ContainerAdapter>,
    ) -> Result<ContainerId, EngineError> {
        if self.spatial.is_occupied(world, location) {
            return Err(EngineError::LocationOccupied { world, location });
        }
        let loaded = self.chunks.is_chunk_loaded(world, location.chunk()) && adapter.is_loaded();
        let id = self
            .containers
            .insert(ContainerEntry::new(world, location, adapter, loaded));
        if let Err(e) = self.spatial.place_container(world, location, id) {
            self.containers.remove(id);
            return Err(e.into());
        }

        self.dirty
            .mark_ducts(self.spatial.neighbor_ducts(world, location).into_iter().map(|(_, d)| d));
        self.resolve_dirty();
        Ok(id)
    }

    /// Unregister a container. Stacks still queued for it are dropped into
    /// the world; the adapter is handed back.
    pub fn remove_container(
        &mut self,
        world: WorldId,
        location: BlockLocation,
    ) -> Result<Box<dyn ContainerAdapter>, EngineError> {
        let id = self
            .spatial
            .remove_container(world, location)
            .map_err(|e| match e {
                SpatialError::NotPlaced(world, location) => EngineError::NoContainerAt { world, location },
                other => other.into(),
            })?;
        let entry = self
            .containers
            .remove(id)
            .ok_or(EngineError::ContainerNotFound(id))?;

        let tick = self.current_tick();
        for (_, stack) in entry.unloaded_items {
            self.drop_stack(world, location, stack, tick);
        }

        self.dirty
            .mark_ducts(self.spatial.neighbor_ducts(world, location).into_iter().map(|(_, d)| d));
        self.resolve_dirty();
        Ok(entry.adapter)
    }

    /// Recompute connections of every marked duct.
    fn resolve_dirty(&mut self) {
        let tick = self.current_tick();
        for id in self.dirty.take_ducts() {
            let Some(duct) = self.ducts.get(id) else {
                continue;
            };
            let conns = resolver::resolve(duct, &self.ducts, &self.spatial, &self.registry);
            let Some(duct) = self.ducts.get_mut(id) else {
                continue;
            };
            if duct.connections == conns.ducts && duct.container_connections == conns.containers {
                continue;
            }
            duct.connections = conns.ducts;
            duct.container_connections = conns.containers;
            log::debug!(
                "connections of duct at {:?} now {} side(s)",
                duct.location,
                conns.degree()
            );
            self.event_bus.emit(Event::ConnectionsChanged { duct: id, tick });
        }
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Put a new item into the Future set of the duct at `location`,
    /// travelling in `direction`.
    pub fn create_item(
        &mut self,
        world: WorldId,
        location: BlockLocation,
        direction: Direction,
        stack: ItemStack,
    ) -> Result<ItemId, EngineError> {
        let duct = self
            .spatial
            .duct_at(world, location)
            .ok_or(EngineError::NoDuctAt { world, location })?;
        self.refresh_load(duct);
        let id = self.spawn_item(duct, direction, stack)?;
        self.flush_sync();
        Ok(id)
    }

    fn spawn_item(&mut self, duct_id: DuctId, direction: Direction, stack: ItemStack) -> Result<ItemId, EngineError> {
        let duct = self
            .ducts
            .get_mut(duct_id)
            .ok_or(EngineError::DuctNotFound(duct_id))?;
        let id = ItemId(self.next_item_id);
        self.next_item_id += 1;

        let item = ItemUnit::new(id, stack, duct.world, duct.location, direction, ItemState::Future);
        let view = ItemView::of(&item, duct_id);
        duct.queues.push(item);
        let resident = duct.loaded;

        let tick = self.current_tick();
        self.item_index.insert(id, duct_id);
        self.visibility.on_item_created(&view, resident);
        self.event_bus.emit(Event::ItemCreated {
            item: id,
            duct: duct_id,
            tick,
        });
        Ok(id)
    }

    fn drop_stack(&mut self, world: WorldId, location: BlockLocation, stack: ItemStack, tick: Ticks) {
        log::warn!(
            "dropping {} x {:?} at {location:?} in {world:?}",
            stack.quantity,
            stack.item_type
        );
        self.event_bus.emit(Event::ItemDropped {
            world,
            location,
            item_type: stack.item_type,
            quantity: stack.quantity,
            tick,
        });
        self.drops.drop_item(world, location, stack);
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// A player connected. Everything already in range is created for it.
    pub fn add_observer(&mut self, observer: ObserverId, world: WorldId, position: Position) -> Result<(), EngineError> {
        if !self.visibility.add_observer(observer, world, position) {
            return Err(EngineError::ObserverExists(observer));
        }
        self.resync_observer(observer);
        self.flush_sync();
        Ok(())
    }

    /// A player moved or changed world.
    pub fn move_observer(&mut self, observer: ObserverId, world: WorldId, position: Position) -> Result<(), EngineError> {
        if !self.visibility.set_position(observer, world, position) {
            return Err(EngineError::ObserverNotFound(observer));
        }
        self.resync_observer(observer);
        self.flush_sync();
        Ok(())
    }

    /// A player disconnected. Nothing is sent.
    pub fn remove_observer(&mut self, observer: ObserverId) -> Result<(), EngineError> {
        if !self.visibility.remove_observer(observer) {
            return Err(EngineError::ObserverNotFound(observer));
        }
        Ok(())
    }

    /// The player entered range of `duct`.
    pub fn on_duct_shown(&mut self, observer: ObserverId, duct: DuctId) -> Result<(), EngineError> {
        self.refresh_load(duct);
        let d = self.ducts.get(duct).ok_or(EngineError::DuctNotFound(duct))?;
        let views: Vec<ItemView> = d.queues.visible().map(|i| ItemView::of(i, duct)).collect();
        if !self.visibility.on_duct_shown(observer, duct, views.iter(), d.loaded) {
            return Err(EngineError::ObserverNotFound(observer));
        }
        self.flush_sync();
        Ok(())
    }

    /// The player left range of `duct`.
    pub fn on_duct_hidden(&mut self, observer: ObserverId, duct: DuctId) -> Result<(), EngineError> {
        let d = self.ducts.get(duct).ok_or(EngineError::DuctNotFound(duct))?;
        let ids: Vec<ItemId> = d.queues.iter().map(|i| i.id).collect();
        if !self.visibility.on_duct_hidden(observer, duct, ids) {
            return Err(EngineError::ObserverNotFound(observer));
        }
        self.flush_sync();
        Ok(())
    }

    fn resync_observer(&mut self, observer: ObserverId) {
        let Some((world, position)) = self.visibility.observer_location(observer) else {
            return;
        };
        let radius = self.visibility.render_distance();
        let nearby: Vec<DuctId> = self
            .spatial
            .ducts_within(world, position, radius)
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        for &id in &nearby {
            self.refresh_load(id);
        }
        let candidates: Vec<ItemView> = nearby
            .into_iter()
            .filter_map(|id| self.ducts.get(id).map(|d| (id, d)))
            .filter(|(_, d)| d.loaded)
            .flat_map(|(id, d)| d.queues.visible().map(move |i| ItemView::of(i, id)))
            .collect();
        self.visibility.resync_observer(observer, candidates.iter());
    }

    /// Re-sample the chunk state of one duct. When it flipped, the duct's
    /// visible items are re-evaluated for every observer. Returns the
    /// current state, or `None` for an unknown duct.
    fn refresh_load(&mut self, id: DuctId) -> Option<bool> {
        let duct = self.ducts.get_mut(id)?;
        let loaded = self.chunks.is_chunk_loaded(duct.world, duct.chunk);
        if loaded == duct.loaded {
            return Some(loaded);
        }
        duct.loaded = loaded;
        log::debug!(
            "duct at {:?} in {:?} {}",
            duct.location,
            duct.world,
            if loaded { "loaded" } else { "unloaded" }
        );
        for item in duct.queues.visible() {
            self.visibility.on_item_moved(&ItemView::of(item, id), loaded);
        }
        Some(loaded)
    }

    fn flush_sync(&mut self) {
        self.visibility.flush(self.broadcaster.as_mut());
    }

    // -----------------------------------------------------------------------
    // Commands and events
    // -----------------------------------------------------------------------

    /// Queue a command for the next tick.
    pub fn submit(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn submit_batch(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.push_batch(commands);
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.pending_count()
    }

    pub fn command_history(&self) -> &[(Ticks, CommandKind)] {
        self.commands.history()
    }

    /// Apply one command immediately.
    pub fn apply_command(&mut self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::PlaceDuct {
                world,
                location,
                duct_type,
            } => self.place_duct(world, location, duct_type).map(|_| ()),
            Command::RemoveDuct { world, location } => {
                let tick = self.current_tick();
                for stack in self.remove_duct(world, location)? {
                    self.drop_stack(world, location, stack, tick);
                }
                Ok(())
            }
            Command::SetBlocked {
                world,
                location,
                direction,
                blocked,
            } => {
                let duct = self.duct_id_at(world, location)?;
                self.set_blocked(duct, direction, blocked)
            }
            Command::SetOutputDirection {
                world,
                location,
                direction,
            } => {
                let duct = self.duct_id_at(world, location)?;
                self.set_output_direction(duct, direction)
            }
            Command::AddContainer {
                world,
                location,
                adapter,
            } => self.add_container(world, location, adapter).map(|_| ()),
            Command::RemoveContainer { world, location } => {
                let adapter = self.remove_container(world, location)?;
                log::debug!("released container adapter {adapter:?}");
                Ok(())
            }
            Command::CreateItem {
                world,
                location,
                direction,
                stack,
            } => self.create_item(world, location, direction, stack).map(|_| ()),
            Command::AddObserver {
                observer,
                world,
                position,
            } => self.add_observer(observer, world, position),
            Command::MoveObserver {
                observer,
                world,
                position,
            } => self.move_observer(observer, world, position),
            Command::RemoveObserver { observer } => self.remove_observer(observer),
            Command::DuctShown {
                observer,
                world,
                location,
            } => {
                let duct = self.duct_id_at(world, location)?;
                self.on_duct_shown(observer, duct)
            }
            Command::DuctHidden {
                observer,
                world,
                location,
            } => {
                let duct = self.duct_id_at(world, location)?;
                self.on_duct_hidden(observer, duct)
            }
        }
    }

    fn duct_id_at(&self, world: WorldId, location: BlockLocation) -> Result<DuctId, EngineError> {
        self.spatial
            .duct_at(world, location)
            .ok_or(EngineError::NoDuctAt { world, location })
    }

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.event_bus.suppress(kind);
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.event_bus.on_passive(kind, listener);
    }

    pub fn on_reactive(&mut self, kind: EventKind, handler: ReactiveHandler) {
        self.event_bus.on_reactive(kind, handler);
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance the simulation by one tick.
    ///
    /// Fails only on a structural violation, after which the engine should
    /// not be ticked again.
    pub fn tick(&mut self) -> Result<TickReport, TickError> {
        let tick = self.current_tick();
        let mut report = TickReport {
            tick,
            extraction_tick: tick % self.config.extract_interval == 0,
            ..TickReport::default()
        };

        // Items numbered from here on were created during this tick.
        let fence = ItemId(self.next_item_id);

        // Phase 1: Pre-tick -- apply queued commands.
        self.phase_pre_tick(&mut report);

        // Phase 2: Load refresh -- sample chunk state once per duct.
        self.phase_load_refresh(&mut report)?;

        // Phase 3: Promotion -- Future -> Active before any movement.
        self.phase_promote(fence, &mut report);

        // Phase 4: Extraction.
        if report.extraction_tick {
            self.phase_extract(&mut report)?;
        }

        // Phase 5: Movement.
        self.phase_movement(&mut report)?;

        // Phase 6: Post-tick -- event delivery and visibility flush.
        self.phase_post_tick();

        // Phase 7: Bookkeeping.
        self.phase_bookkeeping(&report);

        Ok(report)
    }

    fn phase_pre_tick(&mut self, report: &mut TickReport) {
        for command in self.commands.drain(report.tick) {
            let kind = command.kind();
            match self.apply_command(command) {
                Ok(()) => report.commands_applied += 1,
                Err(e) => {
                    report.commands_failed += 1;
                    log::warn!("tick {}: rejected {kind:?} command: {e}", report.tick);
                }
            }
        }
        self.resolve_dirty();
    }

    fn phase_load_refresh(&mut self, report: &mut TickReport) -> Result<(), TickError> {
        let order: Vec<(WorldId, BlockLocation, DuctId)> = self.spatial.iter_ducts().collect();
        for (world, location, id) in order {
            match self.refresh_load(id) {
                None => {
                    return Err(TickError::CorruptIndex {
                        world,
                        location,
                        what: "duct",
                    });
                }
                Some(true) => report.loaded_ducts += 1,
                Some(false) => {}
            }
        }

        for (world, location, id) in self.spatial.iter_containers() {
            let Some(container) = self.containers.get_mut(id) else {
                return Err(TickError::CorruptIndex {
                    world,
                    location,
                    what: "container",
                });
            };
            container.loaded =
                self.chunks.is_chunk_loaded(world, container.chunk) && container.adapter.is_loaded();
        }
        Ok(())
    }

    fn phase_promote(&mut self, fence: ItemId, report: &mut TickReport) {
        let limit = if report.extraction_tick {
            self.config.reactivations_per_extract_tick
        } else {
            0
        };

        for (id, duct) in self.ducts.iter_mut() {
            if !duct.loaded {
                continue;
            }
            report.promoted += duct.queues.promote_future(fence) as u32;

            for item_id in duct.queues.reactivate(limit) {
                report.reactivated += 1;
                if let Some(item) = duct.queues.get(item_id) {
                    self.visibility.on_item_moved(&ItemView::of(item, id), true);
                }
                self.event_bus.emit(Event::ItemReactivated {
                    item: item_id,
                    duct: id,
                    tick: report.tick,
                });
            }
        }
    }

    fn phase_extract(&mut self, report: &mut TickReport) -> Result<(), TickError> {
        let amount = self.config.extract_amount;

        // (duct, side the container is on, container)
        let mut sources = Vec::new();
        for (_, _, id) in self.spatial.iter_ducts() {
            let Some(duct) = self.ducts.get(id) else {
                continue;
            };
            if !duct.loaded || !duct.kind.capabilities().can_extract {
                continue;
            }
            for dir in Direction::all() {
                if let Some(container) = duct.container(dir) {
                    sources.push((id, dir, container, duct.world, duct.location));
                }
            }
        }

        for (duct, dir, cid, world, location) in sources {
            let Some(container) = self.containers.get_mut(cid) else {
                return Err(TickError::DanglingConnection {
                    world,
                    location,
                    what: "container",
                });
            };
            if !container.loaded {
                continue;
            }
            let Some(stack) = container.adapter.extract(dir.opposite(), amount) else {
                continue;
            };
            if stack.is_empty() {
                continue;
            }
            let quantity = stack.quantity;
            // The item travels away from the container.
            let Ok(item) = self.spawn_item(duct, dir.opposite(), stack) else {
                continue;
            };
            report.extracted += 1;
            self.event_bus.emit(Event::ItemExtracted {
                item,
                duct,
                container: cid,
                quantity,
                tick: report.tick,
            });
        }

        let backlog: Vec<ContainerId> = self.spatial.iter_containers().map(|(_, _, c)| c).collect();
        for cid in backlog {
            let Some(container) = self.containers.get_mut(cid) else {
                continue;
            };
            if !container.loaded {
                continue;
            }
            let Some((face, stack)) = container.unloaded_items.pop() else {
                continue;
            };
            if let Some(overflow) = container.adapter.insert(face, stack) {
                let (world, location) = (container.world, container.location);
                self.drop_stack(world, location, overflow, report.tick);
                report.dropped += 1;
            }
        }
        Ok(())
    }

    fn phase_movement(&mut self, report: &mut TickReport) -> Result<(), TickError> {
        let order: Vec<DuctId> = self.spatial.iter_ducts().map(|(_, _, d)| d).collect();

        for id in order {
            let Some(duct) = self.ducts.get_mut(id) else {
                continue;
            };
            if !duct.loaded {
                continue;
            }

            let advance = flow::advance_duct(duct);
            for moved in &advance.moved {
                if let Some(item) = duct.queues.active.iter().find(|i| i.id == *moved) {
                    self.visibility.on_item_moved(&ItemView::of(item, id), true);
                }
            }

            for exit in advance.exits {
                self.apply_exit(id, exit, report)?;
            }

            self.overflow_guard(id, report);
        }
        Ok(())
    }

    fn apply_exit(&mut self, from: DuctId, exit: Exit, report: &mut TickReport) -> Result<(), TickError> {
        let Exit { mut item, outcome } = exit;
        let tick = report.tick;

        match outcome {
            Outcome::HandOff(to) => {
                let Some(dest) = self.ducts.get_mut(to) else {
                    return Err(TickError::DanglingConnection {
                        world: item.world,
                        location: item.location,
                        what: "duct",
                    });
                };
                item.location = dest.location;
                item.state = if dest.loaded {
                    ItemState::Future
                } else {
                    ItemState::Unloaded
                };
                let resident = dest.loaded;
                let view = ItemView::of(&item, to);
                dest.queues.push(item);

                self.item_index.insert(view.id, to);
                self.visibility.on_item_moved(&view, resident);
                report.handed_off += 1;
                log::trace!("item {:?} handed off to {:?}", view.id, view.location);
                self.event_bus.emit(Event::ItemHandedOff {
                    item: view.id,
                    from,
                    to,
                    tick,
                });
            }
            Outcome::Deliver(cid) => {
                self.item_index.remove(&item.id);
                self.visibility.on_item_destroyed(item.id);

                let Some(container) = self.containers.get_mut(cid) else {
                    return Err(TickError::DanglingConnection {
                        world: item.world,
                        location: item.location,
                        what: "container",
                    });
                };
                let face = item.direction.opposite();
                let quantity = item.stack.quantity;
                if container.loaded {
                    if let Some(overflow) = container.adapter.insert(face, item.stack) {
                        let (world, location) = (container.world, container.location);
                        self.drop_stack(world, location, overflow, tick);
                        report.dropped += 1;
                    }
                } else {
                    container.unloaded_items.push((face, item.stack));
                }
                report.delivered += 1;
                log::trace!("item {:?} delivered", item.id);
                self.event_bus.emit(Event::ItemDelivered {
                    item: item.id,
                    container: cid,
                    quantity,
                    tick,
                });
            }
            Outcome::Void => {
                self.item_index.remove(&item.id);
                self.visibility.on_item_destroyed(item.id);
                report.voided += 1;
                self.event_bus.emit(Event::ItemVoided {
                    item: item.id,
                    duct: from,
                    quantity: item.stack.quantity,
                    tick,
                });
            }
        }
        Ok(())
    }

    /// Drop the newest Active items of a duct holding more than the limit.
    fn overflow_guard(&mut self, id: DuctId, report: &mut TickReport) {
        let max = self.config.max_items_per_duct;
        let Some(duct) = self.ducts.get_mut(id) else {
            return;
        };
        let excess = duct.item_count().saturating_sub(max);
        if excess == 0 {
            return;
        }
        let keep = duct.queues.active.len().saturating_sub(excess);
        let spilled = duct.queues.active.split_off(keep);
        let (world, location) = (duct.world, duct.location);

        for item in spilled {
            self.item_index.remove(&item.id);
            self.visibility.on_item_destroyed(item.id);
            self.drop_stack(world, location, item.stack, report.tick);
            report.dropped += 1;
        }
    }

    fn phase_post_tick(&mut self) {
        self.event_bus.deliver();
        let reactive = self.event_bus.drain_commands();
        self.commands.push_batch(reactive);
        self.flush_sync();
    }

    fn phase_bookkeeping(&mut self, report: &TickReport) {
        self.sim_state.tick += 1;
        self.last_report = report.clone();
        log::trace!(
            "tick {} done: {} moved on, {} delivered",
            report.tick,
            report.handed_off,
            report.delivered
        );
    }

    pub fn last_report(&self) -> &TickReport {
        &self.last_report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::StorageContainer;
    use crate::host::{DropLog, SyncLog};
    use crate::id::ItemTypeId;
    use crate::visibility::SyncEvent;

    const W: WorldId = WorldId(0);
    const STONE: ItemTypeId = ItemTypeId(1);

    fn engine() -> Engine {
        Engine::new(Registry::default_pipes().unwrap(), EngineConfig::default()).unwrap()
    }

    fn ty(engine: &Engine, name: &str) -> DuctTypeId {
        engine.registry().type_id(name).unwrap()
    }

    fn at(x: i32) -> BlockLocation {
        BlockLocation::new(x, 64, 0)
    }

    fn place(engine: &mut Engine, name: &str, x: i32) -> DuctId {
        let t = ty(engine, name);
        engine.place_duct(W, at(x), t).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = EngineConfig {
            extract_interval: 0,
            ..Default::default()
        };
        assert!(Engine::new(Registry::default_pipes().unwrap(), cfg).is_err());
    }

    #[test]
    fn placing_adjacent_ducts_connects_them() {
        let mut e = engine();
        let a = place(&mut e, "White", 0);
        let b = place(&mut e, "White", 1);
        assert_eq!(e.ducts[a].connection(Direction::East), Some(b));
        assert_eq!(e.ducts[b].connection(Direction::West), Some(a));
    }

    #[test]
    fn placing_on_occupied_block_fails() {
        let mut e = engine();
        place(&mut e, "White", 0);
        let t = ty(&e, "White");
        assert_eq!(
            e.place_duct(W, at(0), t),
            Err(EngineError::LocationOccupied {
                world: W,
                location: at(0)
            })
        );
    }

    #[test]
    fn unknown_type_fails() {
        let mut e = engine();
        assert_eq!(
            e.place_duct(W, at(0), DuctTypeId(99)),
            Err(EngineError::UnknownDuctType(DuctTypeId(99)))
        );
    }

    #[test]
    fn removing_a_duct_disconnects_neighbours_and_returns_items() {
        let mut e = engine();
        let a = place(&mut e, "White", 0);
        place(&mut e, "White", 1);
        e.create_item(W, at(1), Direction::East, ItemStack::new(STONE, 3))
            .unwrap();

        let drops = e.remove_duct(W, at(1)).unwrap();
        assert_eq!(drops, vec![ItemStack::new(STONE, 3)]);
        assert_eq!(e.ducts[a].connection(Direction::East), None);
        assert!(e.item_index.is_empty());
    }

    #[test]
    fn ducts_at_the_edge_of_the_grid_connect_inwards() {
        let mut e = engine();
        let t = ty(&e, "White");
        let edge = BlockLocation::new(i32::MAX, 64, 0);
        let inner = BlockLocation::new(i32::MAX - 1, 64, 0);
        let a = e.place_duct(W, edge, t).unwrap();
        let b = e.place_duct(W, inner, t).unwrap();
        assert_eq!(e.ducts[a].connected_directions(), vec![Direction::West]);
        assert_eq!(e.ducts[b].connection(Direction::East), Some(a));

        e.create_item(W, edge, Direction::East, ItemStack::new(STONE, 1))
            .unwrap();
        for _ in 0..10 {
            e.tick().unwrap();
        }
        e.remove_duct(W, edge).unwrap();
        assert_eq!(e.ducts[b].connection(Direction::East), None);
    }

    #[test]
    fn remove_missing_duct_fails() {
        let mut e = engine();
        assert!(matches!(
            e.remove_duct(W, at(5)),
            Err(EngineError::NoDuctAt { .. })
        ));
    }

    #[test]
    fn blocking_a_side_cuts_both_directions() {
        let mut e = engine();
        let a = place(&mut e, "White", 0);
        let b = place(&mut e, "White", 1);
        e.set_blocked(a, Direction::East, true).unwrap();
        assert_eq!(e.ducts[a].connection(Direction::East), None);
        assert_eq!(e.ducts[b].connection(Direction::West), None);

        e.set_blocked(a, Direction::East, false).unwrap();
        assert_eq!(e.ducts[b].connection(Direction::West), Some(a));
    }

    #[test]
    fn only_iron_ducts_take_an_output_side() {
        let mut e = engine();
        let white = place(&mut e, "White", 0);
        let iron = place(&mut e, "Iron", 1);
        assert_eq!(
            e.set_output_direction(white, Some(Direction::East)),
            Err(EngineError::NoOutputSide(white))
        );
        assert_eq!(e.ducts[white].output, None);

        e.set_output_direction(iron, Some(Direction::West)).unwrap();
        assert_eq!(e.ducts[iron].output, Some(Direction::West));
    }

    #[test]
    fn create_item_without_duct_is_a_precondition_error() {
        let mut e = engine();
        let result = e.create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1));
        assert_eq!(
            result,
            Err(EngineError::NoDuctAt {
                world: W,
                location: at(0)
            })
        );
        assert!(e.item_index.is_empty());
    }

    #[test]
    fn created_item_waits_one_tick_in_future() {
        let mut e = engine();
        let a = place(&mut e, "White", 0);
        place(&mut e, "White", 1);
        e.create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1))
            .unwrap();
        assert_eq!(e.ducts[a].queues.future.len(), 1);

        e.tick().unwrap();
        assert!(e.ducts[a].queues.future.is_empty());
        assert_eq!(e.ducts[a].queues.active.len(), 1);
    }

    #[test]
    fn queued_create_item_stays_future_for_its_tick() {
        let mut e = engine();
        for x in 0..3 {
            place(&mut e, "White", x);
        }
        e.submit(Command::CreateItem {
            world: W,
            location: at(0),
            direction: Direction::East,
            stack: ItemStack::new(STONE, 1),
        });
        let a = e.spatial.duct_at(W, at(0)).unwrap();

        let report = e.tick().unwrap();
        assert_eq!(report.promoted, 0);
        let item = &e.ducts[a].queues.future[0];
        assert_eq!(item.state, ItemState::Future);
        assert_eq!(item.progress, crate::fixed::Fixed64::ZERO);

        e.tick().unwrap();
        assert!(e.ducts[a].queues.future.is_empty());
        assert_eq!(e.ducts[a].queues.active[0].state, ItemState::Active);
    }

    #[test]
    fn reactive_create_item_is_held_a_tick_after_it_applies() {
        let mut e = engine();
        let a = place(&mut e, "White", 0);
        place(&mut e, "White", 1);
        e.on_reactive(
            EventKind::DuctRemoved,
            Box::new(|_: &Event| {
                vec![Command::CreateItem {
                    world: W,
                    location: at(0),
                    direction: Direction::East,
                    stack: ItemStack::new(STONE, 1),
                }]
            }),
        );
        place(&mut e, "White", 5);
        e.remove_duct(W, at(5)).unwrap();

        // Delivered in this tick's post-tick, applied in the next pre-tick.
        e.tick().unwrap();
        assert_eq!(e.ducts[a].item_count(), 0);
        e.tick().unwrap();
        assert_eq!(e.ducts[a].queues.future.len(), 1);
        e.tick().unwrap();
        assert_eq!(e.ducts[a].queues.active.len(), 1);
    }

    #[test]
    fn extraction_runs_on_every_tenth_tick() {
        let mut e = engine();
        let chest = StorageContainer::with_items(64, STONE, 5);
        e.add_container(W, at(-1), Box::new(chest.clone())).unwrap();
        let d = place(&mut e, "Extraction", 0);

        for _ in 0..9 {
            assert_eq!(e.tick().unwrap().extracted, 0);
        }
        let report = e.tick().unwrap();
        assert!(report.extraction_tick);
        assert_eq!(report.extracted, 1);
        assert_eq!(chest.total(), 4);

        let item = &e.ducts[d].queues.future[0];
        assert_eq!(item.direction, Direction::East);
        assert_eq!(item.state, ItemState::Future);
    }

    #[test]
    fn plain_ducts_do_not_extract() {
        let mut e = engine();
        let chest = StorageContainer::with_items(64, STONE, 5);
        e.add_container(W, at(-1), Box::new(chest.clone())).unwrap();
        place(&mut e, "White", 0);
        for _ in 0..20 {
            e.tick().unwrap();
        }
        assert_eq!(chest.total(), 5);
    }

    #[test]
    fn item_is_delivered_into_container() {
        let mut e = engine();
        let chest = StorageContainer::new(64);
        place(&mut e, "White", 0);
        e.add_container(W, at(1), Box::new(chest.clone())).unwrap();
        e.create_item(W, at(0), Direction::East, ItemStack::new(STONE, 2))
            .unwrap();

        let mut delivered = 0;
        for _ in 0..12 {
            delivered += e.tick().unwrap().delivered;
        }
        assert_eq!(delivered, 1);
        assert_eq!(chest.quantity(STONE), 2);
        assert_eq!(e.item_index.len(), 0);
    }

    #[test]
    fn delivery_overflow_is_dropped() {
        let drops = DropLog::new();
        let mut e = engine().with_drop_sink(drops.clone());
        let chest = StorageContainer::new(1);
        place(&mut e, "White", 0);
        e.add_container(W, at(1), Box::new(chest.clone())).unwrap();
        e.create_item(W, at(0), Direction::East, ItemStack::new(STONE, 3))
            .unwrap();
        for _ in 0..12 {
            e.tick().unwrap();
        }
        assert_eq!(chest.total(), 1);
        assert_eq!(drops.total_quantity(), 2);
        assert_eq!(drops.drops()[0].location, at(1));
    }

    #[test]
    fn void_duct_destroys_items() {
        let mut e = engine();
        place(&mut e, "Void", 0);
        e.create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1))
            .unwrap();
        let mut voided = 0;
        for _ in 0..6 {
            voided += e.tick().unwrap().voided;
        }
        assert_eq!(voided, 1);
        assert!(e.item_index.is_empty());
    }

    #[test]
    fn queued_commands_apply_at_next_tick() {
        let mut e = engine();
        let t = ty(&e, "White");
        e.submit(Command::PlaceDuct {
            world: W,
            location: at(0),
            duct_type: t,
        });
        e.submit(Command::RemoveDuct {
            world: W,
            location: at(9),
        });
        assert!(e.spatial.duct_at(W, at(0)).is_none());

        let report = e.tick().unwrap();
        assert_eq!(report.commands_applied, 1);
        assert_eq!(report.commands_failed, 1);
        assert!(e.spatial.duct_at(W, at(0)).is_some());
    }

    #[test]
    fn reactive_handler_commands_run_next_tick() {
        let mut e = engine();
        let t = ty(&e, "White");
        e.on_reactive(
            EventKind::DuctPlaced,
            Box::new(move |_: &Event| {
                vec![Command::PlaceDuct {
                    world: W,
                    location: at(1),
                    duct_type: t,
                }]
            }),
        );
        place(&mut e, "White", 0);
        e.tick().unwrap();
        assert!(e.spatial.duct_at(W, at(1)).is_none());
        e.tick().unwrap();
        assert!(e.spatial.duct_at(W, at(1)).is_some());
    }

    #[test]
    fn observer_sees_item_created_and_removed() {
        let sync = SyncLog::new();
        let mut e = engine().with_broadcaster(sync.clone());
        let p = ObserverId(1);
        e.add_observer(p, W, Position::from_f64(0.0, 64.0, 0.0)).unwrap();
        place(&mut e, "Void", 0);

        let id = e
            .create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1))
            .unwrap();
        for _ in 0..6 {
            e.tick().unwrap();
        }
        let events = sync.events_for(p);
        assert!(matches!(&events[0], SyncEvent::Create(v) if v.id == id));
        assert_eq!(events.last(), Some(&SyncEvent::Remove(id)));
    }

    #[test]
    fn duplicate_observer_is_rejected() {
        let mut e = engine();
        let p = ObserverId(1);
        e.add_observer(p, W, Position::from_f64(0.0, 0.0, 0.0)).unwrap();
        assert_eq!(
            e.add_observer(p, W, Position::from_f64(0.0, 0.0, 0.0)),
            Err(EngineError::ObserverExists(p))
        );
        e.remove_observer(p).unwrap();
        assert_eq!(e.remove_observer(p), Err(EngineError::ObserverNotFound(p)));
    }

    #[test]
    fn unloaded_duct_freezes_items() {
        let chunks = LoadedChunks::all_loaded();
        let mut e = engine().with_chunk_loader(chunks.clone());
        let a = place(&mut e, "White", 0);
        place(&mut e, "White", 1);
        e.create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1))
            .unwrap();
        e.tick().unwrap();
        let before = e.ducts[a].queues.active[0].progress;

        chunks.unload(W, at(0).chunk());
        for _ in 0..5 {
            e.tick().unwrap();
        }
        assert_eq!(e.ducts[a].queues.active[0].progress, before);
        assert!(!e.ducts[a].loaded);
    }

    #[test]
    fn item_created_in_a_chunk_unloaded_between_ticks_is_not_shown() {
        let chunks = LoadedChunks::all_loaded();
        let sync = SyncLog::new();
        let mut e = engine()
            .with_chunk_loader(chunks.clone())
            .with_broadcaster(sync.clone());
        let p = ObserverId(1);
        e.add_observer(p, W, Position::from_f64(0.0, 64.0, 0.0)).unwrap();
        let a = place(&mut e, "White", 0);
        let early = e
            .create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1))
            .unwrap();
        e.tick().unwrap();
        assert!(e.visibility.is_shown(p, early));

        chunks.unload(W, at(0).chunk());
        let late = e
            .create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1))
            .unwrap();
        assert!(!e.ducts[a].loaded);
        assert!(!e.visibility.is_shown(p, late));
        assert!(!e.visibility.is_shown(p, early));
        assert_eq!(sync.events_for(p).last(), Some(&SyncEvent::Remove(early)));
    }

    #[test]
    fn observer_joining_after_an_unload_sees_nothing_there() {
        let chunks = LoadedChunks::all_loaded();
        let mut e = engine().with_chunk_loader(chunks.clone());
        let a = place(&mut e, "White", 0);
        e.create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1))
            .unwrap();
        e.tick().unwrap();

        chunks.unload(W, at(0).chunk());
        let p = ObserverId(1);
        e.add_observer(p, W, Position::from_f64(0.0, 64.0, 0.0)).unwrap();
        assert!(e.visibility.shown(p).unwrap().is_empty());
        e.on_duct_shown(p, a).unwrap();
        assert!(e.visibility.shown(p).unwrap().is_empty());

        chunks.load(W, at(0).chunk());
        e.on_duct_shown(p, a).unwrap();
        assert_eq!(e.visibility.shown(p).unwrap().len(), 1);
    }

    #[test]
    fn removing_container_drops_its_backlog() {
        let drops = DropLog::new();
        let chunks = LoadedChunks::all_loaded();
        let mut e = engine()
            .with_drop_sink(drops.clone())
            .with_chunk_loader(chunks.clone());
        place(&mut e, "White", 15);
        // The container sits in the next chunk over.
        e.add_container(W, at(16), Box::new(StorageContainer::new(8)))
            .unwrap();
        chunks.unload(W, at(16).chunk());
        e.create_item(W, at(15), Direction::East, ItemStack::new(STONE, 4))
            .unwrap();
        for _ in 0..10 {
            e.tick().unwrap();
        }
        let cid = e.spatial.container_at(W, at(16)).unwrap();
        assert_eq!(e.containers[cid].pending_quantity(), 4);

        e.remove_container(W, at(16)).unwrap();
        assert_eq!(drops.total_quantity(), 4);
        assert!(matches!(
            e.remove_container(W, at(16)),
            Err(EngineError::NoContainerAt { .. })
        ));
    }

    #[test]
    fn overflow_guard_drops_newest_active_items() {
        let drops = DropLog::new();
        let cfg = EngineConfig {
            max_items_per_duct: 2,
            ..Default::default()
        };
        let mut e = Engine::new(Registry::default_pipes().unwrap(), cfg)
            .unwrap()
            .with_drop_sink(drops.clone());
        let d = place(&mut e, "White", 0);
        for _ in 0..4 {
            e.create_item(W, at(0), Direction::East, ItemStack::new(STONE, 1))
                .unwrap();
        }
        let report = e.tick().unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(e.ducts[d].item_count(), 2);
        assert_eq!(drops.total_quantity(), 2);
        assert_eq!(e.item_index.len(), 2);
    }
}
