use crate::session::SessionConfig;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Load session configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SessionConfig, String> {
    let path = path.as_ref();
    info!("Loading session configuration from: {}", path.display());

    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    let config: SessionConfig = serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse YAML config: {}", e))?;

    config.validate()?;

    info!(
        "Session configuration loaded: timeout {}m, warning {}m, check every {}s",
        config.timeout_minutes, config.warning_minutes, config.check_interval_secs
    );

    Ok(config)
}

/// Load configuration with fallback options
pub fn load_config_with_fallback() -> Result<SessionConfig, String> {
    // Try loading from environment variable first
    if let Ok(config_path) = std::env::var("SESSION_CONFIG_PATH") {
        match load_config(&config_path) {
            Ok(config) => return Ok(config),
            Err(e) => warn!(
                "Failed to load config from SESSION_CONFIG_PATH ({}): {}",
                config_path, e
            ),
        }
    }

    // Try common config file locations
    let paths = vec!["session.yaml", "session.yml", "./session.yaml", "./session.yml"];

    for path in paths {
        if Path::new(path).exists() {
            match load_config(path) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load config from '{}': {}", path, e),
            }
        }
    }

    info!("No configuration file found, using built-in defaults");
    Ok(SessionConfig::default())
}
