//! Simulation state, per-tick reports, and the state hash.

use crate::fixed::{Fixed64, Ticks};
use crate::id::WorldId;
use crate::item::ItemStack;
use crate::location::{BlockLocation, Direction};

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

/// Mutable simulation state tracked by the engine.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SimState {
    /// Number of ticks completed.
    pub tick: Ticks,
}

impl SimState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// What happened during one `Engine::tick()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick number that ran (1 for the first call).
    pub tick: Ticks,
    pub extraction_tick: bool,
    pub commands_applied: u32,
    pub commands_failed: u32,
    pub promoted: u32,
    pub reactivated: u32,
    pub extracted: u32,
    pub handed_off: u32,
    pub delivered: u32,
    pub voided: u32,
    /// Stacks dropped into the world (overflow and over-capacity ducts).
    pub dropped: u32,
    pub loaded_ducts: u32,
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of simulation state for desync detection.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn write_block(&mut self, world: WorldId, location: BlockLocation) {
        self.write_u32(world.0);
        self.write_i32(location.x);
        self.write_i32(location.y);
        self.write_i32(location.z);
    }

    pub fn write_direction(&mut self, dir: Direction) {
        self.write(&[dir.index() as u8]);
    }

    pub fn write_stack(&mut self, stack: &ItemStack) {
        self.write_u32(stack.item_type.0);
        self.write_u32(stack.quantity);
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
