//! Resolution pipeline: reads data files, layers connection rules, builds the
//! duct registry and engine configuration.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by the higher-level loading functions.

use ductwork_core::config::{ConfigError, EngineConfig};
use ductwork_core::fixed::Fixed64;
use ductwork_core::id::ItemTypeId;
use ductwork_core::item::ItemStack;
use ductwork_core::registry::{DEFAULT_SPEED, Registry, RegistryBuilder, RegistryError};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::schema::DuctTypeData;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A duplicate duct type name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// The duct definitions were rejected by the registry.
    #[error("invalid duct types in {file}: {source}")]
    Registry {
        file: PathBuf,
        #[source]
        source: RegistryError,
    },

    /// The engine settings failed validation.
    #[error("invalid engine config in {file}: {source}")]
    Config {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(ref existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing.clone(),
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, e: impl std::fmt::Display) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list from a file. For TOML files, extracts the array at the
/// given `toml_key` from a top-level table. For RON and JSON, deserializes
/// directly as `Vec<T>`.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => {
            let table: toml::Value = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
            let array = table
                .get(toml_key)
                .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?
                .clone();
            array
                .try_into()
                .map_err(|e: toml::de::Error| parse_error(path, e))
        }
    }
}

// ===========================================================================
// Registry
// ===========================================================================

fn speed_of(def: &DuctTypeData, file: &Path) -> Result<Fixed64, DataLoadError> {
    match def.speed {
        None => Ok(DEFAULT_SPEED),
        Some(v) => Fixed64::checked_from_num(v).ok_or_else(|| DataLoadError::Parse {
            file: file.to_path_buf(),
            detail: format!("speed {v} of '{}' is not representable", def.name),
        }),
    }
}

/// Build a duct registry from parsed definitions.
///
/// Every type is registered before any rule is applied, so `connect_to` may
/// name types defined later in the file.
pub fn build_registry(defs: &[DuctTypeData], file: &Path) -> Result<Registry, DataLoadError> {
    let registry_err = |source: RegistryError| DataLoadError::Registry {
        file: file.to_path_buf(),
        source,
    };

    let mut seen = HashSet::new();
    let mut builder = RegistryBuilder::new();
    for def in defs {
        if !seen.insert(def.name.as_str()) {
            return Err(DataLoadError::DuplicateName {
                file: file.to_path_buf(),
                name: def.name.clone(),
            });
        }
        builder
            .register_type(&def.name, &def.class, def.kind, speed_of(def, file)?)
            .map_err(registry_err)?;
    }

    for def in defs {
        builder
            .connect_all(&def.name, def.connect_all)
            .map_err(registry_err)?;
        for class in &def.disconnect_from {
            builder
                .disconnect_from_class(&def.name, class)
                .map_err(registry_err)?;
        }
        if !def.connect_to.is_empty() {
            let targets: Vec<&str> = def.connect_to.iter().map(String::as_str).collect();
            builder
                .connect_to(&def.name, &targets)
                .map_err(registry_err)?;
        }
        if let Some(drop) = def.drop {
            builder
                .set_drop(&def.name, ItemStack::new(ItemTypeId(drop.item), drop.quantity))
                .map_err(registry_err)?;
        }
    }

    builder.build().map_err(registry_err)
}

/// Load `ducts.{ron,toml,json}` from `dir` and build the registry.
pub fn load_registry(dir: &Path) -> Result<Registry, DataLoadError> {
    let path = require_data_file(dir, "ducts")?;
    let defs: Vec<DuctTypeData> = deserialize_list(&path, "ducts")?;
    log::debug!("loaded {} duct types from {}", defs.len(), path.display());
    build_registry(&defs, &path)
}

// ===========================================================================
// Engine config
// ===========================================================================

/// Load `engine.{ron,toml,json}` from `dir`. Missing files fall back to the
/// defaults; present files are validated.
pub fn load_engine_config(dir: &Path) -> Result<EngineConfig, DataLoadError> {
    let Some(path) = find_data_file(dir, "engine")? else {
        log::debug!("no engine config in {}, using defaults", dir.display());
        return Ok(EngineConfig::default());
    };
    let config: EngineConfig = deserialize_file(&path)?;
    config.validate().map_err(|source| DataLoadError::Config {
        file: path.clone(),
        source,
    })?;
    Ok(config)
}

// ===========================================================================
// Top-level
// ===========================================================================

/// Everything needed to construct an engine from a data directory.
#[derive(Debug)]
pub struct DuctworkData {
    pub registry: Registry,
    pub config: EngineConfig,
}

/// Load the registry and engine config from a data directory.
pub fn load_ductwork_data(dir: &Path) -> Result<DuctworkData, DataLoadError> {
    let registry = load_registry(dir)?;
    let config = load_engine_config(dir)?;
    log::info!(
        "loaded {} duct types from {} (extract every {} ticks)",
        registry.len(),
        dir.display(),
        config.extract_interval
    );
    Ok(DuctworkData { registry, config })
}

// ===========================================================================
// Tests
// ===========================================================================
