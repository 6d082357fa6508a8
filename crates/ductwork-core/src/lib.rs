//! Ductwork Core -- a tick-driven item-duct simulation engine.
//!
//! Ducts occupy blocks in a voxel world and move discrete item stacks between
//! containers. Each item travels through a duct block as a fractional
//! progress value; at the block centre it is routed to an exit side, at the
//! far edge it is handed to the next duct or delivered to a container.
//!
//! # Seven-Phase Tick Pipeline
//!
//! Each call to [`engine::Engine::tick`] advances the simulation by one tick:
//!
//! 1. **Pre-tick** -- Apply queued commands and re-resolve connections.
//! 2. **Load refresh** -- Sample chunk load state for every duct and container.
//! 3. **Promotion** -- Future items become Active; on extraction ticks a
//!    bounded number of Unloaded items are reactivated.
//! 4. **Extraction** -- Every Nth tick, extraction ducts pull from containers.
//! 5. **Movement** -- Active items advance, route, hand off and deliver.
//! 6. **Post-tick** -- Deliver buffered events, queue reactive commands and
//!    flush observer visibility events.
//! 7. **Bookkeeping** -- Increment the tick counter.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- The simulation context and pipeline orchestrator.
//! - [`registry::Registry`] -- Immutable duct type table with connection rules.
//! - [`duct::Duct`] -- One duct block with its three item sets.
//! - [`flow`] -- Per-item movement and routing.
//! - [`visibility::VisibilitySync`] -- Per-observer shown sets and the
//!   create/update/remove events that keep clients in sync.
//! - [`host`] -- Chunk loading, world drops and broadcasting interfaces.
//! - [`tick_thread::TickDriver`] -- Runs an engine on its own thread at a
//!   fixed rate.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.

pub mod command;
pub mod config;
pub mod container;
pub mod dirty;
pub mod duct;
pub mod engine;
pub mod error;
pub mod event;
pub mod fixed;
pub mod flow;
pub mod host;
pub mod id;
pub mod item;
pub mod location;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod sim;
pub mod spatial;
pub mod tick_thread;
pub mod visibility;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
