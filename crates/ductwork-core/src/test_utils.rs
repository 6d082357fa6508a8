//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::fixed::Fixed64;
use crate::host::{DropLog, LoadedChunks, SyncLog};
use crate::id::*;
use crate::item::ItemStack;
use crate::location::{BlockLocation, Position};
use crate::registry::Registry;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Item types
// ===========================================================================

pub fn stone_type() -> ItemTypeId {
    ItemTypeId(1)
}
pub fn iron_ingot_type() -> ItemTypeId {
    ItemTypeId(2)
}

pub fn stone(quantity: u32) -> ItemStack {
    ItemStack::new(stone_type(), quantity)
}

pub fn iron_ingot(quantity: u32) -> ItemStack {
    ItemStack::new(iron_ingot_type(), quantity)
}

// ===========================================================================
// Locations
// ===========================================================================

pub const OVERWORLD: WorldId = WorldId(0);
pub const NETHER: WorldId = WorldId(1);

/// Block `x` on the test row (y = 64, z = 0).
pub fn at(x: i32) -> BlockLocation {
    BlockLocation::new(x, 64, 0)
}

/// Position of an observer standing on the test row.
pub fn standing_at(x: f64) -> Position {
    Position::from_f64(x, 64.0, 0.0)
}

// ===========================================================================
// Test host
// ===========================================================================

/// An engine wired to recording host collaborators.
///
/// `chunks`, `drops` and `sync` are shared handles; tests toggle chunk load
/// state and inspect drops and observer traffic through them.
pub struct TestHost {
    pub engine: Engine,
    pub chunks: LoadedChunks,
    pub drops: DropLog,
    pub sync: SyncLog,
}

pub fn test_host() -> TestHost {
    test_host_with(EngineConfig::default())
}

pub fn test_host_with(config: EngineConfig) -> TestHost {
    let registry = Registry::default_pipes().expect("default pipe registry");
    let chunks = LoadedChunks::all_loaded();
    let drops = DropLog::new();
    let sync = SyncLog::new();
    let engine = Engine::new(registry, config)
        .expect("valid test config")
        .with_chunk_loader(chunks.clone())
        .with_drop_sink(drops.clone())
        .with_broadcaster(sync.clone());
    TestHost {
        engine,
        chunks,
        drops,
        sync,
    }
}

impl TestHost {
    pub fn pipe(&self, name: &str) -> DuctTypeId {
        self.engine
            .registry()
            .type_id(name)
            .unwrap_or_else(|| panic!("no pipe type {name}"))
    }

    /// Place a pipe of type `name` at `at(x)` in the overworld.
    pub fn place(&mut self, name: &str, x: i32) -> DuctId {
        let ty = self.pipe(name);
        self.engine
            .place_duct(OVERWORLD, at(x), ty)
            .expect("place duct")
    }

    /// Place a straight run of pipes on `xs`.
    pub fn place_line(&mut self, name: &str, xs: std::ops::Range<i32>) -> Vec<DuctId> {
        xs.map(|x| self.place(name, x)).collect()
    }

    /// Run `n` ticks, panicking on a tick error.
    pub fn run_ticks(&mut self, n: u64) {
        for _ in 0..n {
            self.engine.tick().expect("tick");
        }
    }

    /// Units in ducts plus units dropped so far.
    pub fn payload_outside_containers(&self) -> u64 {
        self.engine.payload_in_transit() + u64::from(self.drops.total_quantity())
    }
}
