//! Engine configuration
//!
//! Stored as TOML next to the knowledge base data
//! (`~/.local/share/nous/incremental/incremental.toml` on Linux). Every field
//! has a default, and out-of-range values are clamped rather than rejected.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the configuration file inside the data directory
pub const CONFIG_FILE_NAME: &str = "incremental.toml";

/// Upper bound for any priority value
pub const MAX_PRIORITY: u8 = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    Write(#[from] toml::ser::Error),

    #[error("Data directory not found")]
    DataDirNotFound,
}

/// How often the queue hands a step to an incremental item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InterleaveRatio {
    /// Show this many flashcards between two incremental items
    FlashcardsPerItem(u32),
    /// Every step shows an incremental item
    ItemsOnly,
    /// Incremental items are never interleaved
    FlashcardsOnly,
}

impl Default for InterleaveRatio {
    fn default() -> Self {
        Self::FlashcardsPerItem(4)
    }
}

/// Whether queue entry precomputes the session cache
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    /// Build the session cache once on queue entry
    #[default]
    Full,
    /// Skip precomputation and query on demand for every step
    Light,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Priority given to a new item when no ancestor carries one
    pub default_priority: i64,
    pub interleave: InterleaveRatio,
    /// Fraction of the candidate count used as the number of random swaps
    pub randomness: f64,
    pub performance_mode: PerformanceMode,
    /// Quiet period before pending priority cache writes are flushed
    pub debounce_ms: u64,
    /// Descendants handled concurrently per batch during propagation
    pub propagation_batch_size: usize,
    /// Pause between two propagation batches
    pub batch_delay_ms: u64,
    /// Upper bound on ancestor-chain walks
    pub max_ancestor_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_priority: 50,
            interleave: InterleaveRatio::default(),
            randomness: 0.1,
            performance_mode: PerformanceMode::Full,
            debounce_ms: 200,
            propagation_batch_size: 50,
            batch_delay_ms: 25,
            max_ancestor_depth: 1000,
        }
    }
}

impl EngineConfig {
    /// Default config path inside the local data directory
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::data_local_dir()
            .map(|p| p.join("nous").join("incremental").join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::DataDirNotFound)
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No engine config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config.normalized())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Clamp every field into its valid range
    pub fn normalized(mut self) -> Self {
        let clamped = clamp_priority(self.default_priority);
        if i64::from(clamped) != self.default_priority {
            log::warn!(
                "Engine config: default priority {} out of range, clamped to {}",
                self.default_priority,
                clamped
            );
        }
        self.default_priority = i64::from(clamped);

        if !self.randomness.is_finite() {
            self.randomness = 0.0;
        }
        self.randomness = self.randomness.clamp(0.0, 1.0);
        self.propagation_batch_size = self.propagation_batch_size.max(1);
        self.max_ancestor_depth = self.max_ancestor_depth.max(1);
        self
    }

    pub fn default_priority(&self) -> u8 {
        clamp_priority(self.default_priority)
    }

    pub fn debounce_period(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.debounce_ms as i64)
    }

    pub fn batch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.batch_delay_ms)
    }
}

/// Clamp any integer into the 0-100 priority range
pub fn clamp_priority(value: i64) -> u8 {
    value.clamp(0, i64::from(MAX_PRIORITY)) as u8
}
