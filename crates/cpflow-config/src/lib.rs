pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{HubSettings, RetrySettings, Settings, load_settings};

use cpflow_cloud::Options;
use std::path::PathBuf;

const CONFIG_ENV: &str = "CPFLOW_CONFIG_PATH";
const CONFIG_DIR: &str = ".cpflow";
const CANDIDATES: [&str; 2] = ["cpflow.local.yaml", "cpflow.yaml"];

/// Global config directory (~/.config/cpflow)
pub fn global_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cpflow"))
}

/// Find the settings file.
///
/// Search order:
/// 1. `CPFLOW_CONFIG_PATH` (direct path)
/// 2. Current directory: cpflow.local.yaml, cpflow.yaml
/// 3. `./.cpflow/`: same order
/// 4. `~/.config/cpflow/cpflow.yaml` (global)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to a missing file: {}", CONFIG_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(CONFIG_DIR);
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(global_dir) = global_config_dir() {
        let global_config = global_dir.join("cpflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Find and load the settings, falling back to defaults when no file exists.
pub fn load() -> Result<Options> {
    match find_config_file() {
        Ok(path) => load_settings(&path)?.into_options(),
        Err(ConfigError::ConfigFileNotFound) => {
            tracing::debug!("No settings file found, using defaults");
            Ok(Options::default())
        }
        Err(e) => Err(e),
    }
}
