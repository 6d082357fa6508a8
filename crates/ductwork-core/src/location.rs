//! Block-grid coordinates, chunk coordinates, the six cardinal directions,
//! and fixed-point observer positions.

use crate::fixed::Fixed64;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// The six cardinal directions of the voxel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
    Up,
    Down,
}

impl Direction {
    /// All six directions, in index order.
    pub fn all() -> [Direction; 6] {
        [
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
            Direction::Up,
            Direction::Down,
        ]
    }

    /// Stable index in `0..6`, used for per-direction arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The direction pointing the other way.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Block offset `(dx, dy, dz)` for this direction.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Direction::North => (0, 0, -1),
            Direction::East => (1, 0, 0),
            Direction::South => (0, 0, 1),
            Direction::West => (-1, 0, 0),
            Direction::Up => (0, 1, 0),
            Direction::Down => (0, -1, 0),
        }
    }
}

// ---------------------------------------------------------------------------
// BlockLocation / ChunkPos
// ---------------------------------------------------------------------------

/// Integer block coordinates inside a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockLocation {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockLocation {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The adjacent block in the given direction, or `None` past the edge
    /// of the coordinate range.
    pub fn neighbor(&self, dir: Direction) -> Option<BlockLocation> {
        let (dx, dy, dz) = dir.offset();
        Some(BlockLocation::new(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.z.checked_add(dz)?,
        ))
    }

    /// The 16x16 column chunk containing this block.
    pub fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: self.x >> 4,
            z: self.z >> 4,
        }
    }

    /// The block origin as a fixed-point position.
    pub fn origin(&self) -> Position {
        Position {
            x: Fixed64::from_num(self.x),
            y: Fixed64::from_num(self.y),
            z: Fixed64::from_num(self.z),
        }
    }
}

/// Chunk column coordinates (block x/z divided by 16, rounding down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A continuous position (observer location) in fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: Fixed64,
    pub y: Fixed64,
    pub z: Fixed64,
}

impl Position {
    pub fn new(x: Fixed64, y: Fixed64, z: Fixed64) -> Self {
        Self { x, y, z }
    }

    /// Convenience constructor for tests and host glue. Not for the sim loop.
    pub fn from_f64(x: f64, y: f64, z: f64) -> Self {
        Self::new(Fixed64::from_num(x), Fixed64::from_num(y), Fixed64::from_num(z))
    }

    /// Squared Euclidean distance. Saturates instead of overflowing, so very
    /// distant points compare as "far" rather than wrapping.
    pub fn distance_squared(&self, other: &Position) -> Fixed64 {
        let dx = self.x.saturating_sub(other.x);
        let dy = self.y.saturating_sub(other.y);
        let dz = self.z.saturating_sub(other.z);
        dx.saturating_mul(dx)
            .saturating_add(dy.saturating_mul(dy))
            .saturating_add(dz.saturating_mul(dz))
    }

    /// Whether `other` lies within `radius` of this position (inclusive).
    pub fn within(&self, other: &Position, radius: Fixed64) -> bool {
        self.distance_squared(other) <= radius.saturating_mul(radius)
    }

    /// The block containing this position.
    pub fn block(&self) -> BlockLocation {
        BlockLocation::new(
            self.x.floor().to_num(),
            self.y.floor().to_num(),
            self.z.floor().to_num(),
        )
    }
}
