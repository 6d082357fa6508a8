//! Requests from other execution contexts.
//!
//! Network handlers, chunk listeners and reactive event handlers never touch
//! the engine directly. They queue [`Command`]s, which the engine applies in
//! submission order at the start of the next tick. A command that fails is
//! logged and skipped; it never aborts the tick.

use crate::container::ContainerAdapter;
use crate::fixed::Ticks;
use crate::id::{DuctTypeId, ObserverId, WorldId};
use crate::item::ItemStack;
use crate::location::{BlockLocation, Direction, Position};

// ---------------------------------------------------------------------------
// Command enum
// ---------------------------------------------------------------------------

/// A single request against the engine. Ducts and containers are addressed
/// by location, since that is what other contexts know.
#[derive(Debug)]
pub enum Command {
    PlaceDuct {
        world: WorldId,
        location: BlockLocation,
        duct_type: DuctTypeId,
    },
    /// Remove a duct; its drops go to the engine's drop sink.
    RemoveDuct {
        world: WorldId,
        location: BlockLocation,
    },
    SetBlocked {
        world: WorldId,
        location: BlockLocation,
        direction: Direction,
        blocked: bool,
    },
    SetOutputDirection {
        world: WorldId,
        location: BlockLocation,
        direction: Option<Direction>,
    },
    AddContainer {
        world: WorldId,
        location: BlockLocation,
        adapter: Box<dyn ContainerAdapter>,
    },
    RemoveContainer {
        world: WorldId,
        location: BlockLocation,
    },
    CreateItem {
        world: WorldId,
        location: BlockLocation,
        direction: Direction,
        stack: ItemStack,
    },
    AddObserver {
        observer: ObserverId,
        world: WorldId,
        position: Position,
    },
    MoveObserver {
        observer: ObserverId,
        world: WorldId,
        position: Position,
    },
    RemoveObserver {
        observer: ObserverId,
    },
    DuctShown {
        observer: ObserverId,
        world: WorldId,
        location: BlockLocation,
    },
    DuctHidden {
        observer: ObserverId,
        world: WorldId,
        location: BlockLocation,
    },
}

/// Discriminant tag for commands, kept in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    PlaceDuct,
    RemoveDuct,
    SetBlocked,
    SetOutputDirection,
    AddContainer,
    RemoveContainer,
    CreateItem,
    AddObserver,
    MoveObserver,
    RemoveObserver,
    DuctShown,
    DuctHidden,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::PlaceDuct { .. } => CommandKind::PlaceDuct,
            Command::RemoveDuct { .. } => CommandKind::RemoveDuct,
            Command::SetBlocked { .. } => CommandKind::SetBlocked,
            Command::SetOutputDirection { .. } => CommandKind::SetOutputDirection,
            Command::AddContainer { .. } => CommandKind::AddContainer,
            Command::RemoveContainer { .. } => CommandKind::RemoveContainer,
            Command::CreateItem { .. } => CommandKind::CreateItem,
            Command::AddObserver { .. } => CommandKind::AddObserver,
            Command::MoveObserver { .. } => CommandKind::MoveObserver,
            Command::RemoveObserver { .. } => CommandKind::RemoveObserver,
            Command::DuctShown { .. } => CommandKind::DuctShown,
            Command::DuctHidden { .. } => CommandKind::DuctHidden,
        }
    }
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// A queue of commands waiting for the next tick boundary.
///
/// Supports optional history tracking for debugging.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: Vec<Command>,
    /// Executed commands: (tick, kind).
    history: Vec<(Ticks, CommandKind)>,
    /// Maximum history entries to retain. 0 = no history.
    max_history: usize,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that retains up to `max_history` entries.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            max_history,
            ..Self::default()
        }
    }

    pub fn push(&mut self, command: Command) {
        self.pending.push(command);
    }

    pub fn push_batch(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.pending.extend(commands);
    }

    /// Drain all pending commands, recording them in history with the given
    /// tick. Returns them in submission order.
    pub fn drain(&mut self, tick: Ticks) -> Vec<Command> {
        let commands: Vec<Command> = self.pending.drain(..).collect();

        if self.max_history > 0 {
            self.history
                .extend(commands.iter().map(|cmd| (tick, cmd.kind())));
            let excess = self.history.len().saturating_sub(self.max_history);
            if excess > 0 {
                self.history.drain(..excess);
            }
        }

        commands
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn history(&self) -> &[(Ticks, CommandKind)] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remove_observer(id: u64) -> Command {
        Command::RemoveObserver {
            observer: ObserverId(id),
        }
    }

    fn place() -> Command {
        Command::PlaceDuct {
            world: WorldId(0),
            location: BlockLocation::new(0, 0, 0),
            duct_type: DuctTypeId(0),
        }
    }

    #[test]
    fn new_queue_is_empty() {
        let queue = CommandQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn drain_preserves_submission_order() {
        let mut queue = CommandQueue::new();
        queue.push(place());
        queue.push_batch([remove_observer(1), remove_observer(2)]);

        let drained = queue.drain(1);
        let kinds: Vec<CommandKind> = drained.iter().map(Command::kind).collect();
        assert_eq!(
            kinds,
            vec![
                CommandKind::PlaceDuct,
                CommandKind::RemoveObserver,
                CommandKind::RemoveObserver
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn no_history_by_default() {
        let mut queue = CommandQueue::new();
        queue.push(place());
        queue.drain(1);
        assert!(queue.history().is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut queue = CommandQueue::with_max_history(2);
        for tick in 0..3 {
            queue.push(remove_observer(tick));
            queue.drain(tick);
        }
        let ticks: Vec<Ticks> = queue.history().iter().map(|(t, _)| *t).collect();
        assert_eq!(ticks, vec![1, 2]);

        queue.clear_history();
        assert!(queue.history().is_empty());
    }
}
