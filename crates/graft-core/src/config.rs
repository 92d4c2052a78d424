// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::PartitionMode;

/// Name of the stream used when a requested RNG stream does not exist.
pub const DEFAULT_STREAM: &str = "default";

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A field holds a value the engine cannot use.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-arena settings. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraftConfig {
    /// Stream that RNG lookups fall back to.
    pub default_stream: String,
    /// How `split_by` assigns entries matched by several filters.
    pub partition_mode: PartitionMode,
    /// Keep per-root path indices between flatten and update.
    pub cache_paths: bool,
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            default_stream: DEFAULT_STREAM.to_owned(),
            partition_mode: PartitionMode::FirstMatch,
            cache_paths: true,
        }
    }
}

impl GraftConfig {
    /// Parses and validates a JSON config blob.
    ///
    /// # Errors
    /// [`ConfigError::Serde`] for malformed JSON, [`ConfigError::Invalid`]
    /// for an empty `default_stream`.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    /// [`ConfigError::Serde`] if serialization fails.
    pub fn to_json_vec(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] for an empty `default_stream`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_stream.is_empty() {
            return Err(ConfigError::Invalid("default_stream must not be empty".into()));
        }
        Ok(())
    }
}
