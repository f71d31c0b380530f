//! Locating and reading the configuration file.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::path::PathResolver;
use super::schema::TetherConfig;
use crate::error::{Result, TetherError};

/// A parsed configuration and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TetherConfig,
    /// File that was read; `None` when running on defaults.
    pub source: Option<PathBuf>,
    /// Resolves relative paths against the file's directory.
    pub resolver: PathResolver,
}

/// `<config_dir>/tether/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tether").join("config.toml"))
}

/// Parse and validate configuration text.
///
/// # Errors
///
/// Returns [`TetherError::ConfigParse`] for malformed TOML and
/// [`TetherError::ConfigInvalid`] for out-of-range values.
pub fn parse_config(content: &str) -> Result<TetherConfig> {
    let config: TetherConfig =
        toml::from_str(content).map_err(|e| TetherError::ConfigParse(format!("TOML: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration.
///
/// An explicit path must exist. Without one, the default location is tried
/// and a missing file means built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let (path, required) = match explicit {
        Some(path) => (Some(path.to_path_buf()), true),
        None => (default_config_path(), false),
    };

    let Some(path) = path else {
        debug!("No config directory on this platform, using defaults");
        return Ok(defaults());
    };

    if !path.exists() {
        if required {
            return Err(TetherError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(defaults());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| {
        TetherError::ConfigParse(format!("Failed to read {}: {e}", path.display()))
    })?;
    let config = parse_config(&content)?;
    let resolver = PathResolver::for_file(&path)?;
    info!(path = %path.display(), "Loaded configuration");

    Ok(LoadedConfig {
        config,
        source: Some(path),
        resolver,
    })
}

fn defaults() -> LoadedConfig {
    LoadedConfig {
        config: TetherConfig::default(),
        source: None,
        resolver: PathResolver::for_cwd(),
    }
}
