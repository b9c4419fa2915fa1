//! TOML configuration file parsing

use serde::Deserialize;
use crate::config::AppConfig;
use crate::error::ConfigError;

/// TOML configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct TomlConfig {
    pub netns: Option<String>,
    pub logging: Option<LoggingConfig>,
    pub routing: Option<RoutingConfig>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

/// Routing table configuration
#[derive(Debug, Deserialize)]
pub struct RoutingConfig {
    pub main_table: Option<u32>,
    pub mark_rule_priority: Option<u32>,
    pub pinned_destinations: Option<Vec<String>>,
}

/// Load configuration from TOML file
pub fn load_toml_config(path: &str) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::FileNotFound { path: path.to_string() })?;

    toml::from_str(&content)
        .map_err(|e| ConfigError::InvalidFormat(e.to_string()))
}

/// Apply values present in the file over base configuration
pub fn apply_toml_config(mut base_config: AppConfig, file: TomlConfig) -> AppConfig {
    if let Some(netns) = file.netns {
        base_config.netns = Some(netns);
    }

    if let Some(level) = file.logging.and_then(|l| l.level) {
        base_config.log_level = level;
    }

    if let Some(routing) = file.routing {
        if let Some(table) = routing.main_table {
            base_config.main_table = table;
        }
        if let Some(priority) = routing.mark_rule_priority {
            base_config.mark_rule_priority = priority;
        }
        if let Some(pinned) = routing.pinned_destinations {
            base_config.pinned_destinations = pinned;
        }
    }

    base_config
}
