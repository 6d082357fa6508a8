//! Connection resolution for a single duct.
//!
//! Looks at the six neighbouring blocks and decides which of them the duct
//! is attached to. Duct edges require type compatibility and no manual block
//! on either side; container adjacency only honours the duct's own blocks.

use crate::duct::Duct;
use crate::id::{ContainerId, DuctId};
use crate::location::Direction;
use crate::registry::Registry;
use crate::spatial::SpatialIndex;
use slotmap::SlotMap;

/// The resolved attachments of one duct, indexed by [`Direction::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connections {
    pub ducts: [Option<DuctId>; 6],
    pub containers: [Option<ContainerId>; 6],
}

impl Connections {
    pub fn duct(&self, dir: Direction) -> Option<DuctId> {
        self.ducts[dir.index()]
    }

    pub fn container(&self, dir: Direction) -> Option<ContainerId> {
        self.containers[dir.index()]
    }

    /// Number of attached sides.
    pub fn degree(&self) -> usize {
        Direction::all()
            .into_iter()
            .filter(|&d| self.duct(d).is_some() || self.container(d).is_some())
            .count()
    }
}

/// Compute the attachments of `duct` from the current neighbourhood.
///
/// The result is symmetric for duct edges: both sides run the same check
/// against the same compatibility matrix and each other's block sets.
pub fn resolve(
    duct: &Duct,
    ducts: &SlotMap<DuctId, Duct>,
    spatial: &SpatialIndex,
    registry: &Registry,
) -> Connections {
    let mut out = Connections::default();

    for dir in Direction::all() {
        if duct.is_blocked(dir) {
            continue;
        }

        if let Some(other_id) = spatial.neighbor_duct(duct.world, duct.location, dir) {
            let Some(other) = ducts.get(other_id) else {
                continue;
            };
            if !other.is_blocked(dir.opposite())
                && registry.compatible(duct.duct_type, other.duct_type)
            {
                out.ducts[dir.index()] = Some(other_id);
            }
        }

        out.containers[dir.index()] = spatial.neighbor_container(duct.world, duct.location, dir);
    }

    out
}
