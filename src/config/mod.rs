//! Configuration management module
//!
//! Handles loading configuration from multiple sources with proper precedence:
//! CLI arguments > environment variables > TOML files > defaults

use crate::error::ConfigError;
use crate::routing::{MigrationPolicy, DEFAULT_RULE_PRIORITY, MAIN_TABLE};
use ipnetwork::IpNetwork;

pub mod cli;
pub mod env;
pub mod toml;

use self::cli::CliArgs;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Target network namespace; `None` is the caller's namespace
    pub netns: Option<String>,
    pub log_level: String,
    pub main_table: u32,
    pub mark_rule_priority: u32,
    /// Destinations (CIDR) never moved out of the source table
    pub pinned_destinations: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            netns: None,
            log_level: "info".to_string(),
            main_table: MAIN_TABLE,
            mark_rule_priority: DEFAULT_RULE_PRIORITY,
            pinned_destinations: vec!["fe80::/64".to_string()],
        }
    }
}

impl AppConfig {
    /// Check values that can only be verified once all sources are merged
    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }

        if self.main_table == 0 {
            return Err(ConfigError::ValidationError(
                "main table id must be non-zero".to_string(),
            ));
        }

        if let Some(ref netns) = self.netns {
            if netns.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "network namespace must not be empty".to_string(),
                ));
            }
        }

        self.pinned_networks().map(|_| ())
    }

    /// Pinned destinations with host bits cleared, so `fe80::1/64` pins
    /// `fe80::/64`
    pub fn pinned_networks(&self) -> Result<Vec<IpNetwork>, ConfigError> {
        self.pinned_destinations
            .iter()
            .map(|dst| {
                let invalid = |e: ipnetwork::IpNetworkError| {
                    ConfigError::InvalidFormat(format!(
                        "invalid pinned destination '{}': {}",
                        dst, e
                    ))
                };
                let net = dst.parse::<IpNetwork>().map_err(invalid)?;
                IpNetwork::new(net.network(), net.prefix()).map_err(invalid)
            })
            .collect()
    }

    pub fn migration_policy(&self) -> Result<MigrationPolicy, ConfigError> {
        Ok(MigrationPolicy::new(self.pinned_networks()?))
    }
}

/// Merge defaults, the TOML file, the environment and the command line
pub fn load_configuration(cli: &CliArgs) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::default();

    if let Some(ref path) = cli.config {
        let file = toml::load_toml_config(path)?;
        config = toml::apply_toml_config(config, file);
    }

    let config = env::apply_env_config(config)?;
    let config = cli.apply_to_config(config)?;
    config.validate()?;
    Ok(config)
}
