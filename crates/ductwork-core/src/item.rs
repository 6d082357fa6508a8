use crate::id::ItemTypeId;
use serde::{Deserialize, Serialize};

/// A payload stack: an item type and a count. Opaque to the flow engine,
/// which only moves, splits, and hands stacks to containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_type: ItemTypeId,
    pub quantity: u32,
}

impl ItemStack {
    pub fn new(item_type: ItemTypeId, quantity: u32) -> Self {
        Self {
            item_type,
            quantity,
        }
    }

    /// Split off up to `quantity` units into a new stack. Returns `None` if
    /// this stack is empty or `quantity` is zero.
    pub fn split_off(&mut self, quantity: u32) -> Option<ItemStack> {
        let taken = quantity.min(self.quantity);
        if taken == 0 {
            return None;
        }
        self.quantity -= taken;
        Some(ItemStack::new(self.item_type, taken))
    }

    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }
}

/// A bounded slot holding fungible stacks, used by [`StorageContainer`].
///
/// [`StorageContainer`]: crate::container::StorageContainer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySlot {
    pub stacks: Vec<ItemStack>,
    pub capacity: u32,
}

impl InventorySlot {
    pub fn new(capacity: u32) -> Self {
        Self {
            stacks: Vec::new(),
            capacity,
        }
    }

    /// Add fungible items. Returns the amount that didn't fit.
    #[must_use = "overflow count indicates items that did not fit"]
    pub fn add(&mut self, item_type: ItemTypeId, quantity: u32) -> u32 {
        let space = self.capacity.saturating_sub(self.total());
        let to_add = quantity.min(space);
        let overflow = quantity - to_add;

        if to_add > 0 {
            if let Some(stack) = self.stacks.iter_mut().find(|s| s.item_type == item_type) {
                stack.quantity += to_add;
            } else {
                self.stacks.push(ItemStack::new(item_type, to_add));
            }
        }

        overflow
    }

    /// Take up to `quantity` units of whichever stack comes first.
    pub fn take_first(&mut self, quantity: u32) -> Option<ItemStack> {
        let stack = self.stacks.first_mut()?;
        let taken = stack.split_off(quantity);
        self.stacks.retain(|s| s.quantity > 0);
        taken
    }

    /// Get quantity of a specific item type.
    pub fn quantity(&self, item_type: ItemTypeId) -> u32 {
        self.stacks
            .iter()
            .find(|s| s.item_type == item_type)
            .map(|s| s.quantity)
            .unwrap_or(0)
    }

    /// Total items across all types.
    pub fn total(&self) -> u32 {
        self.stacks.iter().map(|s| s.quantity).sum()
    }
}
