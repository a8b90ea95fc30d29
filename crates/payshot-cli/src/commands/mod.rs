//! Subcommand implementations.

pub mod batch;
pub mod cache;
pub mod config;
pub mod process;

use std::path::Path;

use payshot_core::models::config::PayshotConfig;

/// Load the configuration from `--config`, else the user config file, else
/// defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<PayshotConfig> {
    let config = match config_path {
        Some(path) => PayshotConfig::from_file(Path::new(path))?,
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                PayshotConfig::from_file(&default_path)?
            } else {
                PayshotConfig::default()
            }
        }
    };

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    Ok(config)
}
