//! Flashing session configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Session configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Baud rate for the initial BROM connection.
    pub initial_baud_rate: u32,
    /// Baud rate requested once FDL1 is up (0 keeps the current rate).
    pub fdl2_baud_rate: u32,
    /// Simulate every device exchange instead of touching the wire.
    pub dry_run: bool,
    /// Fallback read size when the partition table reports 0 for an
    /// NV partition.
    pub nv_fallback_size: u32,
    /// Fallback read size for calibration partitions with unknown size.
    pub calibration_fallback_size: u32,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            initial_baud_rate: 115_200,
            fdl2_baud_rate: 921_600,
            dry_run: false,
            nv_fallback_size: 1024 * 1024,
            calibration_fallback_size: 512 * 1024,
        }
    }
}

impl FlashConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
