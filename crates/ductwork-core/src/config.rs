//! Engine configuration and its validation.

use crate::fixed::Fixed64;
use serde::{Deserialize, Serialize};

/// Tunables of the flow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extraction runs on every tick whose number is a multiple of this.
    /// Default: 10.
    pub extract_interval: u64,
    /// Units pulled per (duct, side) per extraction. Default: 1.
    pub extract_amount: u32,
    /// Items moved from a duct's Unloaded bucket to Active per extraction
    /// tick. Default: 1.
    pub reactivations_per_extract_tick: u32,
    /// Maximum observer-to-duct distance, in blocks, at which items are
    /// shown. Default: 25.
    pub render_distance: u32,
    /// Items a duct may hold before the newest Active ones are dropped into
    /// the world. Default: 64.
    pub max_items_per_duct: usize,
    /// Ring-buffer capacity per simulation event kind. Default: 1024.
    pub event_buffer_capacity: usize,
    /// Executed commands retained in history. 0 disables. Default: 0.
    pub command_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extract_interval: 10,
            extract_amount: 1,
            reactivations_per_extract_tick: 1,
            render_distance: 25,
            max_items_per_duct: 64,
            event_buffer_capacity: 1024,
            command_history: 0,
        }
    }
}

impl EngineConfig {
    pub fn render_distance_fixed(&self) -> Fixed64 {
        Fixed64::from_num(self.render_distance)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extract_interval == 0 {
            return Err(ConfigError::ZeroExtractInterval);
        }
        if self.extract_amount == 0 {
            return Err(ConfigError::ZeroExtractAmount);
        }
        if self.max_items_per_duct == 0 {
            return Err(ConfigError::ZeroDuctCapacity);
        }
        // Q32.32 holds squared distances up to 2^31.
        if self.render_distance > 46_340 {
            return Err(ConfigError::RenderDistanceTooLarge {
                value: self.render_distance,
            });
        }
        Ok(())
    }
}

/// Errors detected by [`EngineConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("extract_interval must be at least 1")]
    ZeroExtractInterval,
    #[error("extract_amount must be at least 1")]
    ZeroExtractAmount,
    #[error("max_items_per_duct must be at least 1")]
    ZeroDuctCapacity,
    #[error("render_distance {value} is too large")]
    RenderDistanceTooLarge { value: u32 },
}
