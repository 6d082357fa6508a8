//! Typed simulation events with pre-allocated ring buffers.
//!
//! Events are emitted while a tick runs (and by topology operations between
//! ticks) and delivered in batch during the post-tick phase. Each event kind
//! has its own [`EventBuffer`] ring buffer with a configurable capacity.
//!
//! # Subscriber Types
//!
//! - **Passive listeners**: read-only, used for statistics and host hooks.
//! - **Reactive handlers**: return [`Command`]s applied at the next pre-tick.
//!
//! # Suppression
//!
//! Event kinds can be suppressed via [`EventBus::suppress`], which prevents
//! any allocation or recording for that kind.
//!
//! These events are for host-side bookkeeping. Observer visibility has its
//! own protocol in [`crate::visibility`].

use crate::command::Command;
use crate::fixed::Ticks;
use crate::id::{ContainerId, DuctId, DuctTypeId, ItemId, ItemTypeId, WorldId};
use crate::location::BlockLocation;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A simulation event. All events carry the tick at which they occurred
/// (the tick being run, or the next one for changes made between ticks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // -- Items --
    ItemCreated {
        item: ItemId,
        duct: DuctId,
        tick: Ticks,
    },
    ItemExtracted {
        item: ItemId,
        duct: DuctId,
        container: ContainerId,
        quantity: u32,
        tick: Ticks,
    },
    ItemHandedOff {
        item: ItemId,
        from: DuctId,
        to: DuctId,
        tick: Ticks,
    },
    ItemDelivered {
        item: ItemId,
        container: ContainerId,
        quantity: u32,
        tick: Ticks,
    },
    ItemDropped {
        world: WorldId,
        location: BlockLocation,
        item_type: ItemTypeId,
        quantity: u32,
        tick: Ticks,
    },
    ItemVoided {
        item: ItemId,
        duct: DuctId,
        quantity: u32,
        tick: Ticks,
    },
    ItemReactivated {
        item: ItemId,
        duct: DuctId,
        tick: Ticks,
    },

    // -- Topology --
    DuctPlaced {
        duct: DuctId,
        duct_type: DuctTypeId,
        tick: Ticks,
    },
    DuctRemoved {
        duct: DuctId,
        tick: Ticks,
    },
    ConnectionsChanged {
        duct: DuctId,
        tick: Ticks,
    },
}

/// Discriminant tag for event types, used for suppression and subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ItemCreated,
    ItemExtracted,
    ItemHandedOff,
    ItemDelivered,
    ItemDropped,
    ItemVoided,
    ItemReactivated,
    DuctPlaced,
    DuctRemoved,
    ConnectionsChanged,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 10;

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ItemCreated { .. } => EventKind::ItemCreated,
            Event::ItemExtracted { .. } => EventKind::ItemExtracted,
            Event::ItemHandedOff { .. } => EventKind::ItemHandedOff,
            Event::ItemDelivered { .. } => EventKind::ItemDelivered,
            Event::ItemDropped { .. } => EventKind::ItemDropped,
            Event::ItemVoided { .. } => EventKind::ItemVoided,
            Event::ItemReactivated { .. } => EventKind::ItemReactivated,
            Event::DuctPlaced { .. } => EventKind::DuctPlaced,
            Event::DuctRemoved { .. } => EventKind::DuctRemoved,
            Event::ConnectionsChanged { .. } => EventKind::ConnectionsChanged,
        }
    }
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBuffer -- pre-allocated ring buffer
// ---------------------------------------------------------------------------

/// A pre-allocated ring buffer for events. Fixed capacity; when full, the
/// oldest events are dropped.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Option<Event>>,
    /// Write position (wraps around).
    head: usize,
    len: usize,
    /// Total events ever written (including dropped).
    total_written: u64,
}

impl EventBuffer {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of events that were dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity() as u64)
    }

    /// Iterate over events from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        // When full, head is the oldest entry.
        let start = if self.len < self.capacity() { 0 } else { self.head };
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.events[(start + i) % cap].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&Event) + Send>;

/// A reactive handler receives an event and returns commands to apply at
/// the next tick.
pub type ReactiveHandler = Box<dyn FnMut(&Event) -> Vec<Command> + Send>;

enum Subscriber {
    Passive(PassiveListener),
    Reactive(ReactiveHandler),
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subscriber::Passive(_) => f.write_str("Passive(<fn>)"),
            Subscriber::Reactive(_) => f.write_str("Reactive(<fn>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Holds one ring buffer per event kind, subscriber lists, and suppression
/// flags.
pub struct EventBus {
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    /// Per kind, in registration order.
    subscribers: [Vec<Subscriber>; EVENT_KIND_COUNT],
    /// Commands collected from reactive handlers during delivery.
    pending_commands: Vec<Command>,
    default_capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("subscribers", &self.subscribers)
            .field("pending_commands", &self.pending_commands.len())
            .field("default_capacity", &self.default_capacity)
            .finish()
    }
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity per kind.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            subscribers: Default::default(),
            pending_commands: Vec::new(),
            default_capacity,
        }
    }

    /// Suppress an event kind. Suppressed events are never allocated or buffered.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.buffers[kind.index()] = None;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Record an event. No-op if its kind is suppressed.
    pub fn emit(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        let capacity = self.default_capacity;
        self.buffers[idx]
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push(event);
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.subscribers[kind.index()].push(Subscriber::Passive(listener));
    }

    pub fn on_reactive(&mut self, kind: EventKind, handler: ReactiveHandler) {
        self.subscribers[kind.index()].push(Subscriber::Reactive(handler));
    }

    /// Deliver all buffered events to subscribers, then clear the buffers.
    ///
    /// Kinds are delivered in declaration order; within a kind, subscribers
    /// run in registration order and each sees events oldest first. Commands
    /// from reactive handlers accumulate until drained.
    pub fn deliver(&mut self) {
        for idx in 0..EVENT_KIND_COUNT {
            let Some(buffer) = self.buffers[idx].as_mut() else {
                continue;
            };
            if buffer.is_empty() {
                continue;
            }
            let events: Vec<Event> = buffer.iter().cloned().collect();
            buffer.clear();

            for subscriber in &mut self.subscribers[idx] {
                for event in &events {
                    match subscriber {
                        Subscriber::Passive(listener) => listener(event),
                        Subscriber::Reactive(handler) => {
                            self.pending_commands.extend(handler(event));
                        }
                    }
                }
            }
        }
    }

    /// Take the commands collected from reactive handlers.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.pending_commands)
    }

    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.buffers[kind.index()].as_ref()
    }

    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffer(kind).map_or(0, EventBuffer::len)
    }

    /// Total events ever emitted for a kind (including dropped).
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.buffer(kind).map_or(0, EventBuffer::total_written)
    }

    pub fn pending_command_count(&self) -> usize {
        self.pending_commands.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ObserverId;
    use parking_lot::Mutex;
    use slotmap::SlotMap;
    use std::sync::Arc;

    fn duct_id() -> DuctId {
        let mut sm = SlotMap::<DuctId, ()>::with_key();
        sm.insert(())
    }

    fn created(item: u64, tick: Ticks) -> Event {
        Event::ItemCreated {
            item: ItemId(item),
            duct: duct_id(),
            tick,
        }
    }

    #[test]
    fn ring_wraps_and_drops_oldest() {
        let mut buf = EventBuffer::new(3);
        for i in 0..5 {
            buf.push(created(i, i));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.total_written(), 5);
        assert_eq!(buf.dropped_count(), 2);
        let ticks: Vec<Ticks> = buf
            .iter()
            .map(|e| match e {
                Event::ItemCreated { tick, .. } => *tick,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ticks, vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buf = EventBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
    }

    #[test]
    fn suppressed_kind_is_not_buffered() {
        let mut bus = EventBus::new(8);
        bus.suppress(EventKind::ItemCreated);
        bus.emit(created(1, 1));
        assert!(bus.is_suppressed(EventKind::ItemCreated));
        assert_eq!(bus.buffered_count(EventKind::ItemCreated), 0);
        assert_eq!(bus.total_emitted(EventKind::ItemCreated), 0);
    }

    #[test]
    fn passive_listener_sees_events_then_buffer_clears() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut bus = EventBus::new(8);
        bus.on_passive(
            EventKind::ItemCreated,
            Box::new(move |e: &Event| sink.lock().push(e.clone())),
        );
        bus.emit(created(1, 1));
        bus.emit(created(2, 1));
        bus.deliver();

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(bus.buffered_count(EventKind::ItemCreated), 0);

        // Nothing is delivered twice.
        bus.deliver();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn reactive_handler_commands_are_collected() {
        let mut bus = EventBus::new(8);
        bus.on_reactive(
            EventKind::ItemCreated,
            Box::new(|_: &Event| {
                vec![Command::RemoveObserver {
                    observer: ObserverId(1),
                }]
            }),
        );
        bus.emit(created(1, 1));
        bus.deliver();
        assert_eq!(bus.pending_command_count(), 1);
        assert_eq!(bus.drain_commands().len(), 1);
        assert_eq!(bus.pending_command_count(), 0);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new(8);
        for name in ["first", "second"] {
            let o = order.clone();
            bus.on_passive(
                EventKind::DuctRemoved,
                Box::new(move |_: &Event| o.lock().push(name)),
            );
        }
        bus.emit(Event::DuctRemoved {
            duct: duct_id(),
            tick: 3,
        });
        bus.deliver();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }
}
