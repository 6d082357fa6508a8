use crate::id::DuctId;
use std::collections::BTreeSet;

/// Tracks ducts whose connections must be recomputed.
///
/// Structural changes mark the duct and its neighbours; the engine resolves
/// everything marked in one pass at the end of the operation or of the
/// pre-tick command drain.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    dirty_ducts: BTreeSet<DuctId>,
    topology_changes: u64,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_duct(&mut self, duct: DuctId) {
        self.dirty_ducts.insert(duct);
    }

    pub fn mark_ducts(&mut self, ducts: impl IntoIterator<Item = DuctId>) {
        self.dirty_ducts.extend(ducts);
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_ducts.is_empty()
    }

    pub fn is_duct_dirty(&self, duct: DuctId) -> bool {
        self.dirty_ducts.contains(&duct)
    }

    /// Take the marked set in id order, leaving the tracker clean.
    pub fn take_ducts(&mut self) -> Vec<DuctId> {
        if !self.dirty_ducts.is_empty() {
            self.topology_changes += 1;
        }
        std::mem::take(&mut self.dirty_ducts).into_iter().collect()
    }

    /// Number of resolution passes that had work to do.
    pub fn topology_changes(&self) -> u64 {
        self.topology_changes
    }

    pub fn mark_clean(&mut self) {
        self.dirty_ducts.clear();
    }
}
