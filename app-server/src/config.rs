//! Configuration file loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use docqa_retrieval::RagConfig;
use tracing::debug;

/// `<config dir>/docqa/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("docqa").join("config.toml"))
}

/// Load a configuration file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<RagConfig> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config at {}, using defaults", path.display());
            return Ok(RagConfig::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let config: RagConfig =
        toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}
