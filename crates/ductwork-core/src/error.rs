use crate::id::{ContainerId, DuctId, DuctTypeId, ObserverId, WorldId};
use crate::location::BlockLocation;
use crate::spatial::SpatialError;

/// A rejected engine operation. The engine state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("no duct at {location:?} in world {world:?}")]
    NoDuctAt {
        world: WorldId,
        location: BlockLocation,
    },
    #[error("no container at {location:?} in world {world:?}")]
    NoContainerAt {
        world: WorldId,
        location: BlockLocation,
    },
    #[error("block {location:?} in world {world:?} is already occupied")]
    LocationOccupied {
        world: WorldId,
        location: BlockLocation,
    },
    #[error("unknown duct type {0:?}")]
    UnknownDuctType(DuctTypeId),
    #[error("duct {0:?} does not exist")]
    DuctNotFound(DuctId),
    #[error("duct {0:?} has no configurable output side")]
    NoOutputSide(DuctId),
    #[error("container {0:?} does not exist")]
    ContainerNotFound(ContainerId),
    #[error("observer {0:?} is not registered")]
    ObserverNotFound(ObserverId),
    #[error("observer {0:?} is already registered")]
    ObserverExists(ObserverId),
}

impl From<SpatialError> for EngineError {
    fn from(e: SpatialError) -> Self {
        match e {
            SpatialError::Occupied(world, location) => EngineError::LocationOccupied { world, location },
            SpatialError::NotPlaced(world, location) => EngineError::NoDuctAt { world, location },
        }
    }
}

/// A structural violation that halts the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickError {
    #[error("spatial index entry at {location:?} in world {world:?} points to a missing {what}")]
    CorruptIndex {
        world: WorldId,
        location: BlockLocation,
        what: &'static str,
    },
    #[error("duct at {location:?} in world {world:?} is connected to a missing {what}")]
    DanglingConnection {
        world: WorldId,
        location: BlockLocation,
        what: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spatial_errors_map_to_engine_errors() {
        let loc = BlockLocation::new(1, 2, 3);
        let e: EngineError = SpatialError::Occupied(WorldId(0), loc).into();
        assert_eq!(
            e,
            EngineError::LocationOccupied {
                world: WorldId(0),
                location: loc
            }
        );
        let e: EngineError = SpatialError::NotPlaced(WorldId(0), loc).into();
        assert!(matches!(e, EngineError::NoDuctAt { .. }));
    }

    #[test]
    fn errors_display() {
        let e = EngineError::UnknownDuctType(DuctTypeId(7));
        assert!(e.to_string().contains("unknown duct type"));
        let t = TickError::CorruptIndex {
            world: WorldId(0),
            location: BlockLocation::new(0, 0, 0),
            what: "duct",
        };
        assert!(t.to_string().contains("missing duct"));
    }
}
