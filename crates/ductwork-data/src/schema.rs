//! Serde data file structs for duct content definitions.
//!
//! These structs define the on-disk format for duct types and engine
//! tunables. They are deserialized from RON, JSON, or TOML data files and
//! then resolved into engine types by the loader.

use ductwork_core::registry::DuctKind;
use serde::Deserialize;

// ===========================================================================
// Duct types
// ===========================================================================

/// A duct type definition in a data file.
///
/// Connection rules are layered in field order: `connect_all` sets the
/// base, `disconnect_from` removes whole classes, `connect_to` adds named
/// types back.
#[derive(Debug, Clone, Deserialize)]
pub struct DuctTypeData {
    pub name: String,
    #[serde(default = "default_class")]
    pub class: String,
    #[serde(default = "default_kind")]
    pub kind: DuctKind,
    /// Blocks per tick. Defaults to one block every eight ticks.
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default = "default_true")]
    pub connect_all: bool,
    #[serde(default)]
    pub disconnect_from: Vec<String>,
    #[serde(default)]
    pub connect_to: Vec<String>,
    #[serde(default)]
    pub drop: Option<DropData>,
}

fn default_class() -> String {
    "pipe".to_string()
}

fn default_kind() -> DuctKind {
    DuctKind::Plain
}

fn default_true() -> bool {
    true
}

/// What a duct drops when removed: `(item type id, quantity)`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DropData {
    pub item: u32,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

// ===========================================================================
// TOML wrappers
// ===========================================================================

/// TOML files can't have a bare top-level array, so duct lists live under a
/// `[[ducts]]` key.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlDucts {
    pub ducts: Vec<DuctTypeData>,
}
