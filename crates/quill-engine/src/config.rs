//! Engine configuration
//!
//! Hosts embed the engine with an [`EngineConfig`], usually deserialized
//! from their own settings file. Missing fields fall back to the constants
//! in [`crate::vm::defaults`].

use crate::vm::defaults::{DEFAULT_MAX_FRAMES, DEFAULT_MAX_VALUES, DEFAULT_PRIORITY};
use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration text could not be parsed
    #[error("Invalid engine configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A limit was set to zero
    #[error("Invalid engine configuration: {0} must be positive")]
    ZeroLimit(&'static str),
}

/// Per-process resource limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessLimits {
    /// Maximum number of execution frames
    pub max_frames: usize,
    /// Maximum value-stack depth
    pub max_values: usize,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            max_values: DEFAULT_MAX_VALUES,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Priority of newly created processes (lower runs first)
    pub default_priority: i32,
    /// Resource limits applied to every process
    pub limits: ProcessLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            limits: ProcessLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty-printed JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Check that all limits are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_frames == 0 {
            return Err(ConfigError::ZeroLimit("limits.max_frames"));
        }
        if self.limits.max_values == 0 {
            return Err(ConfigError::ZeroLimit("limits.max_values"));
        }
        Ok(())
    }
}
