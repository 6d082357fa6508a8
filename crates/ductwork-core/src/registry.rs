//! Duct-type registry and the connection-compatibility rules between types.
//!
//! Types are registered on a [`RegistryBuilder`], their connection rules are
//! layered (base default, then class exclusions, then explicit allow rules),
//! and [`RegistryBuilder::build`] freezes everything into an immutable
//! [`Registry`] with a precomputed, symmetric compatibility matrix.

use crate::fixed::{Fixed64, HALF};
use crate::id::DuctTypeId;
use crate::item::ItemStack;
use std::collections::{BTreeSet, HashMap};

// ---------------------------------------------------------------------------
// Kinds and capabilities
// ---------------------------------------------------------------------------

/// Behavioural variant of a duct type. Movement logic dispatches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuctKind {
    /// Routes items round-robin over its exits.
    Plain,
    /// Like `Plain`, and pulls items out of adjacent containers.
    Extraction,
    /// Sends every item out of one configured output direction.
    Iron,
    /// Destroys every item that reaches its centre.
    Void,
}

/// Explicit capability flags derived from a [`DuctKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_extract: bool,
    pub can_route: bool,
    pub is_sink: bool,
}

/// What happens to an item that has nowhere to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadEndPolicy {
    /// Turn around if the way back is connected, otherwise wait at the centre.
    Reverse,
    /// Wait at the centre until an exit appears.
    Stall,
}

impl DuctKind {
    pub fn capabilities(self) -> Capabilities {
        match self {
            DuctKind::Plain | DuctKind::Iron => Capabilities {
                can_route: true,
                ..Capabilities::default()
            },
            DuctKind::Extraction => Capabilities {
                can_extract: true,
                can_route: true,
                is_sink: false,
            },
            DuctKind::Void => Capabilities {
                is_sink: true,
                ..Capabilities::default()
            },
        }
    }

    pub fn dead_end(self) -> DeadEndPolicy {
        match self {
            DuctKind::Iron => DeadEndPolicy::Stall,
            _ => DeadEndPolicy::Reverse,
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Connection rules authored for one type, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRules {
    /// Base default: connect to every type.
    pub connect_all: bool,
    /// Classes excluded after the base default.
    pub disconnect_classes: BTreeSet<String>,
    /// Type names allowed again after the exclusions. Always wins.
    pub connect_to: BTreeSet<String>,
}

impl Default for ConnectionRules {
    fn default() -> Self {
        Self {
            connect_all: true,
            disconnect_classes: BTreeSet::new(),
            connect_to: BTreeSet::new(),
        }
    }
}

/// A duct type definition in the registry.
#[derive(Debug, Clone)]
pub struct DuctTypeDef {
    pub name: String,
    /// Class tag matched by "disconnect from class" rules.
    pub class: String,
    pub kind: DuctKind,
    /// Progress per tick through one block. `0 < speed <= 0.5`.
    pub speed: Fixed64,
    /// What the duct itself drops when removed.
    pub drop: Option<ItemStack>,
    pub rules: ConnectionRules,
}

/// Default item speed: an item crosses one block in eight ticks.
pub const DEFAULT_SPEED: Fixed64 = Fixed64::from_bits(1 << 29);

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing an immutable Registry.
/// Three-phase lifecycle: registration -> rule layering -> finalization.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    types: Vec<DuctTypeDef>,
    name_to_id: HashMap<String, DuctTypeId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: Register a duct type with default rules (connect to all).
    pub fn register_type(
        &mut self,
        name: &str,
        class: &str,
        kind: DuctKind,
        speed: Fixed64,
    ) -> Result<DuctTypeId, RegistryError> {
        if self.name_to_id.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        let id = DuctTypeId(self.types.len() as u32);
        self.types.push(DuctTypeDef {
            name: name.to_string(),
            class: class.to_string(),
            kind,
            speed,
            drop: None,
            rules: ConnectionRules::default(),
        });
        self.name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    /// Phase 2: Mutate an existing type by name.
    pub fn mutate_type<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut DuctTypeDef),
    {
        let id = self
            .name_to_id
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        f(&mut self.types[id.0 as usize]);
        Ok(())
    }

    /// Phase 2: Set the base default for a type.
    pub fn connect_all(&mut self, name: &str, connect: bool) -> Result<(), RegistryError> {
        self.mutate_type(name, |def| def.rules.connect_all = connect)
    }

    /// Phase 2: Exclude every type of `class`.
    pub fn disconnect_from_class(&mut self, name: &str, class: &str) -> Result<(), RegistryError> {
        self.mutate_type(name, |def| {
            def.rules.disconnect_classes.insert(class.to_string());
        })
    }

    /// Phase 2: Explicitly allow the named types, overriding exclusions.
    pub fn connect_to(&mut self, name: &str, targets: &[&str]) -> Result<(), RegistryError> {
        self.mutate_type(name, |def| {
            def.rules
                .connect_to
                .extend(targets.iter().map(|t| t.to_string()));
        })
    }

    /// Phase 2: Set what a duct of this type drops when removed.
    pub fn set_drop(&mut self, name: &str, drop: ItemStack) -> Result<(), RegistryError> {
        self.mutate_type(name, |def| def.drop = Some(drop))
    }

    pub fn type_id(&self, name: &str) -> Option<DuctTypeId> {
        self.name_to_id.get(name).copied()
    }

    /// Phase 3: Validate and freeze. Computes the compatibility matrix.
    pub fn build(self) -> Result<Registry, RegistryError> {
        for def in &self.types {
            if def.speed <= Fixed64::ZERO || def.speed > HALF {
                return Err(RegistryError::InvalidSpeed {
                    name: def.name.clone(),
                    speed: def.speed,
                });
            }
            for target in &def.rules.connect_to {
                if !self.name_to_id.contains_key(target) {
                    return Err(RegistryError::UnknownTarget {
                        name: def.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        let n = self.types.len();
        let mut permits = vec![false; n * n];
        for (a, def_a) in self.types.iter().enumerate() {
            for (b, def_b) in self.types.iter().enumerate() {
                permits[a * n + b] = permits_one_way(def_a, def_b);
            }
        }

        let mut compatible = vec![false; n * n];
        for a in 0..n {
            for b in 0..n {
                let ab = permits[a * n + b];
                let ba = permits[b * n + a];
                if ab != ba && a < b {
                    log::debug!(
                        "asymmetric connection rules between '{}' and '{}'; no edge",
                        self.types[a].name,
                        self.types[b].name
                    );
                }
                compatible[a * n + b] = ab && ba;
            }
        }

        Ok(Registry {
            types: self.types,
            name_to_id: self.name_to_id,
            compatible,
        })
    }
}

/// Rule layering for one direction: default, exclusions, allow-overrides.
fn permits_one_way(from: &DuctTypeDef, to: &DuctTypeDef) -> bool {
    if from.rules.connect_to.contains(&to.name) {
        return true;
    }
    if from.rules.disconnect_classes.contains(&to.class) {
        return false;
    }
    from.rules.connect_all
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable registry. Frozen after build(). Thread-safe to share.
#[derive(Debug)]
pub struct Registry {
    types: Vec<DuctTypeDef>,
    name_to_id: HashMap<String, DuctTypeId>,
    /// Row-major `n * n` symmetric matrix.
    compatible: Vec<bool>,
}

impl Registry {
    /// The twelve pipe types of the classic pipe set and their rules.
    ///
    /// Colored pipes only join pipes of their own color and white pipes;
    /// every other type joins everything.
    pub fn default_pipes() -> Result<Registry, RegistryError> {
        const COLORS: [&str; 5] = ["Blue", "Red", "Yellow", "Green", "Black"];
        let ice_speed = DEFAULT_SPEED * Fixed64::from_num(2);

        let mut b = RegistryBuilder::new();
        b.register_type("White", "colored", DuctKind::Plain, DEFAULT_SPEED)?;
        for color in COLORS {
            b.register_type(color, "colored", DuctKind::Plain, DEFAULT_SPEED)?;
        }
        b.register_type("Golden", "pipe", DuctKind::Plain, DEFAULT_SPEED)?;
        b.register_type("Iron", "pipe", DuctKind::Iron, DEFAULT_SPEED)?;
        b.register_type("Ice", "pipe", DuctKind::Plain, ice_speed)?;
        b.register_type("Void", "pipe", DuctKind::Void, DEFAULT_SPEED)?;
        b.register_type("Extraction", "pipe", DuctKind::Extraction, DEFAULT_SPEED)?;
        b.register_type("Crafting", "pipe", DuctKind::Plain, DEFAULT_SPEED)?;

        for color in COLORS {
            b.disconnect_from_class(color, "colored")?;
            b.connect_to(color, &["White", color])?;
        }
        b.build()
    }

    pub fn get(&self, id: DuctTypeId) -> Option<&DuctTypeDef> {
        self.types.get(id.0 as usize)
    }

    pub fn type_id(&self, name: &str) -> Option<DuctTypeId> {
        self.name_to_id.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Whether ducts of types `a` and `b` join when adjacent. Symmetric.
    /// Unknown ids never connect.
    pub fn compatible(&self, a: DuctTypeId, b: DuctTypeId) -> bool {
        let n = self.types.len();
        let (a, b) = (a.0 as usize, b.0 as usize);
        if a >= n || b >= n {
            return false;
        }
        self.compatible[a * n + b]
    }

    /// The duct's own drop when it is destroyed.
    pub fn on_destroy(&self, id: DuctTypeId) -> Option<ItemStack> {
        self.get(id).and_then(|def| def.drop.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = (DuctTypeId, &DuctTypeDef)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, def)| (DuctTypeId(i as u32), def))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duct type not found: {0}")]
    NotFound(String),
    #[error("duct type registered twice: {0}")]
    Duplicate(String),
    #[error("duct type '{name}' allows unknown type '{target}'")]
    UnknownTarget { name: String, target: String },
    #[error("duct type '{name}' has speed {speed} outside (0, 0.5]")]
    InvalidSpeed { name: String, speed: Fixed64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipes() -> Registry {
        Registry::default_pipes().unwrap()
    }

    fn compatible(reg: &Registry, a: &str, b: &str) -> bool {
        reg.compatible(reg.type_id(a).unwrap(), reg.type_id(b).unwrap())
    }

    #[test]
    fn default_pipes_register_twelve_types() {
        let reg = pipes();
        assert_eq!(reg.len(), 12);
        assert!(reg.type_id("Extraction").is_some());
        assert!(reg.type_id("Copper").is_none());
    }

    #[test]
    fn colored_pipes_join_white_and_themselves_only() {
        let reg = pipes();
        assert!(compatible(&reg, "Blue", "White"));
        assert!(compatible(&reg, "Blue", "Blue"));
        assert!(!compatible(&reg, "Blue", "Red"));
        assert!(compatible(&reg, "Blue", "Golden"));
        assert!(compatible(&reg, "White", "Red"));
    }

    #[test]
    fn compatibility_is_symmetric() {
        let reg = pipes();
        for (a, _) in reg.iter() {
            for (b, _) in reg.iter() {
                assert_eq!(reg.compatible(a, b), reg.compatible(b, a));
            }
        }
    }

    #[test]
    fn asymmetric_rules_yield_no_edge() {
        let mut b = RegistryBuilder::new();
        b.register_type("A", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        b.register_type("B", "y", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        // A refuses class y; B still accepts everything.
        b.disconnect_from_class("A", "y").unwrap();
        let reg = b.build().unwrap();
        assert!(!compatible(&reg, "A", "B"));
        assert!(!compatible(&reg, "B", "A"));
        assert!(compatible(&reg, "B", "B"));
    }

    #[test]
    fn allow_rule_overrides_exclusion_regardless_of_order() {
        let mut b = RegistryBuilder::new();
        b.register_type("A", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        b.register_type("B", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        b.connect_to("A", &["B"]).unwrap();
        b.disconnect_from_class("A", "x").unwrap();
        let reg = b.build().unwrap();
        assert!(compatible(&reg, "A", "B"));
        assert!(!compatible(&reg, "A", "A"));
    }

    #[test]
    fn base_default_off_connects_only_to_allowed() {
        let mut b = RegistryBuilder::new();
        b.register_type("A", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        b.register_type("B", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        b.register_type("C", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        b.connect_all("A", false).unwrap();
        b.connect_to("A", &["C"]).unwrap();
        let reg = b.build().unwrap();
        assert!(!compatible(&reg, "A", "B"));
        assert!(compatible(&reg, "A", "C"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut b = RegistryBuilder::new();
        b.register_type("A", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        let result = b.register_type("A", "x", DuctKind::Void, DEFAULT_SPEED);
        assert!(matches!(result, Err(RegistryError::Duplicate(_))));
    }

    #[test]
    fn unknown_allow_target_fails_build() {
        let mut b = RegistryBuilder::new();
        b.register_type("A", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        b.connect_to("A", &["Ghost"]).unwrap();
        assert!(matches!(b.build(), Err(RegistryError::UnknownTarget { .. })));
    }

    #[test]
    fn speed_out_of_range_fails_build() {
        let mut b = RegistryBuilder::new();
        b.register_type("Fast", "x", DuctKind::Plain, Fixed64::ONE).unwrap();
        assert!(matches!(b.build(), Err(RegistryError::InvalidSpeed { .. })));
    }

    #[test]
    fn mutate_nonexistent_fails() {
        let mut b = RegistryBuilder::new();
        assert!(b.connect_all("nope", true).is_err());
    }

    #[test]
    fn capabilities_follow_kind() {
        assert!(DuctKind::Extraction.capabilities().can_extract);
        assert!(!DuctKind::Plain.capabilities().can_extract);
        assert!(DuctKind::Void.capabilities().is_sink);
        assert!(!DuctKind::Void.capabilities().can_route);
        assert_eq!(DuctKind::Iron.dead_end(), DeadEndPolicy::Stall);
        assert_eq!(DuctKind::Plain.dead_end(), DeadEndPolicy::Reverse);
    }

    #[test]
    fn on_destroy_returns_configured_drop() {
        use crate::id::ItemTypeId;
        let mut b = RegistryBuilder::new();
        b.register_type("A", "x", DuctKind::Plain, DEFAULT_SPEED).unwrap();
        b.set_drop("A", ItemStack::new(ItemTypeId(9), 1)).unwrap();
        let reg = b.build().unwrap();
        let id = reg.type_id("A").unwrap();
        assert_eq!(reg.on_destroy(id), Some(ItemStack::new(ItemTypeId(9), 1)));
    }
}
