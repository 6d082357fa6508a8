//! Spatial index mapping `(world, block)` to ducts and to containers.
//!
//! Pure lookup structure. Both maps are ordered so sweeps over "every duct
//! in every world" visit ducts in a deterministic order.

use crate::id::{ContainerId, DuctId, WorldId};
use crate::location::{BlockLocation, Direction, Position};
use crate::fixed::Fixed64;
use std::collections::BTreeMap;

/// Errors from spatial operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpatialError {
    #[error("block {1:?} in world {0:?} is occupied")]
    Occupied(WorldId, BlockLocation),
    #[error("nothing placed at {1:?} in world {0:?}")]
    NotPlaced(WorldId, BlockLocation),
}

/// A spatial index of ducts and containers per world.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    ducts: BTreeMap<WorldId, BTreeMap<BlockLocation, DuctId>>,
    containers: BTreeMap<WorldId, BTreeMap<BlockLocation, ContainerId>>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Placement --

    /// Record a duct. A block holds at most one duct or one container.
    pub fn place_duct(
        &mut self,
        world: WorldId,
        loc: BlockLocation,
        duct: DuctId,
    ) -> Result<(), SpatialError> {
        if self.is_occupied(world, loc) {
            return Err(SpatialError::Occupied(world, loc));
        }
        self.ducts.entry(world).or_default().insert(loc, duct);
        Ok(())
    }

    pub fn remove_duct(&mut self, world: WorldId, loc: BlockLocation) -> Result<DuctId, SpatialError> {
        let map = self
            .ducts
            .get_mut(&world)
            .ok_or(SpatialError::NotPlaced(world, loc))?;
        let duct = map.remove(&loc).ok_or(SpatialError::NotPlaced(world, loc))?;
        if map.is_empty() {
            self.ducts.remove(&world);
        }
        Ok(duct)
    }

    pub fn place_container(
        &mut self,
        world: WorldId,
        loc: BlockLocation,
        container: ContainerId,
    ) -> Result<(), SpatialError> {
        if self.is_occupied(world, loc) {
            return Err(SpatialError::Occupied(world, loc));
        }
        self.containers.entry(world).or_default().insert(loc, container);
        Ok(())
    }

    pub fn remove_container(
        &mut self,
        world: WorldId,
        loc: BlockLocation,
    ) -> Result<ContainerId, SpatialError> {
        let map = self
            .containers
            .get_mut(&world)
            .ok_or(SpatialError::NotPlaced(world, loc))?;
        let container = map.remove(&loc).ok_or(SpatialError::NotPlaced(world, loc))?;
        if map.is_empty() {
            self.containers.remove(&world);
        }
        Ok(container)
    }

    // -- Point queries --

    pub fn duct_at(&self, world: WorldId, loc: BlockLocation) -> Option<DuctId> {
        self.ducts.get(&world)?.get(&loc).copied()
    }

    pub fn container_at(&self, world: WorldId, loc: BlockLocation) -> Option<ContainerId> {
        self.containers.get(&world)?.get(&loc).copied()
    }

    pub fn is_occupied(&self, world: WorldId, loc: BlockLocation) -> bool {
        self.duct_at(world, loc).is_some() || self.container_at(world, loc).is_some()
    }

    // -- Adjacency --

    /// The duct adjacent to `loc` in `dir`, if any.
    pub fn neighbor_duct(&self, world: WorldId, loc: BlockLocation, dir: Direction) -> Option<DuctId> {
        self.duct_at(world, loc.neighbor(dir)?)
    }

    /// The container adjacent to `loc` in `dir`, if any.
    pub fn neighbor_container(
        &self,
        world: WorldId,
        loc: BlockLocation,
        dir: Direction,
    ) -> Option<ContainerId> {
        self.container_at(world, loc.neighbor(dir)?)
    }

    /// Ducts in all six neighbouring blocks.
    pub fn neighbor_ducts(&self, world: WorldId, loc: BlockLocation) -> Vec<(Direction, DuctId)> {
        Direction::all()
            .into_iter()
            .filter_map(|dir| self.neighbor_duct(world, loc, dir).map(|d| (dir, d)))
            .collect()
    }

    // -- Area queries --

    /// Every duct whose block origin lies within `radius` of `center`.
    ///
    /// Scans the x-range of the bounding box through the ordered map, then
    /// filters by Euclidean distance.
    pub fn ducts_within(&self, world: WorldId, center: Position, radius: Fixed64) -> Vec<(BlockLocation, DuctId)> {
        let Some(map) = self.ducts.get(&world) else {
            return Vec::new();
        };
        let r: i32 = radius.ceil().saturating_to_num();
        let slack = r.unsigned_abs().saturating_add(1);
        let c = center.block();
        let min = BlockLocation::new(c.x.saturating_sub(r), i32::MIN, i32::MIN);
        let max = BlockLocation::new(c.x.saturating_add(r), i32::MAX, i32::MAX);

        map.range(min..=max)
            .filter(|(loc, _)| {
                loc.y.abs_diff(c.y) <= slack
                    && loc.z.abs_diff(c.z) <= slack
                    && center.within(&loc.origin(), radius)
            })
            .map(|(&loc, &duct)| (loc, duct))
            .collect()
    }

    // -- Iteration --

    /// Every duct in every world, ordered by world then location.
    pub fn iter_ducts(&self) -> impl Iterator<Item = (WorldId, BlockLocation, DuctId)> + '_ {
        self.ducts
            .iter()
            .flat_map(|(&w, map)| map.iter().map(move |(&loc, &d)| (w, loc, d)))
    }

    /// Every container in every world, ordered by world then location.
    pub fn iter_containers(
        &self,
    ) -> impl Iterator<Item = (WorldId, BlockLocation, ContainerId)> + '_ {
        self.containers
            .iter()
            .flat_map(|(&w, map)| map.iter().map(move |(&loc, &c)| (w, loc, c)))
    }

    // -- Stats --

    pub fn duct_count(&self) -> usize {
        self.ducts.values().map(BTreeMap::len).sum()
    }

    pub fn container_count(&self) -> usize {
        self.containers.values().map(BTreeMap::len).sum()
    }
}
