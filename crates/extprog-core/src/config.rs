//! Bridge configuration
//!
//! Process-wide settings, injected into components at construction. Loaded
//! from TOML when a file is given, otherwise derived from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Subdirectory of the data dir that holds per-step interchange directories.
pub const TMPDIR_BASE_NAME: &str = "terraform-provider-external";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Parent of the unique per-step interchange directories.
    pub tmpdir_base: PathBuf,
    /// Kill programs that run longer than this. `None` waits for the host to cancel.
    pub timeout_secs: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tmpdir_base: default_tmpdir_base(),
            timeout_secs: None,
        }
    }
}

/// `<TF_DATA_DIR or .terraform>/terraform-provider-external`
pub fn default_tmpdir_base() -> PathBuf {
    let data_dir = std::env::var_os("TF_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".terraform"));
    data_dir.join(TMPDIR_BASE_NAME)
}

impl BridgeConfig {
    pub fn with_tmpdir_base(tmpdir_base: impl Into<PathBuf>) -> Self {
        Self {
            tmpdir_base: tmpdir_base.into(),
            ..Default::default()
        }
    }

    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} - using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Render as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
