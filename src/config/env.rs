//! Environment variable configuration handling

use crate::config::AppConfig;
use crate::error::ConfigError;
use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "NETNS_POLICY_ROUTING_";

/// Apply environment variable configuration over base configuration
pub fn apply_env_config(mut base_config: AppConfig) -> Result<AppConfig, ConfigError> {
    if let Ok(netns) = env::var(format!("{}NETNS", ENV_PREFIX)) {
        base_config.netns = (!netns.trim().is_empty()).then_some(netns);
    }

    if let Ok(level) = env::var(format!("{}LOG_LEVEL", ENV_PREFIX)) {
        base_config.log_level = level;
    }

    if let Ok(table) = env::var(format!("{}MAIN_TABLE", ENV_PREFIX)) {
        base_config.main_table = parse_u32("MAIN_TABLE", &table)?;
    }

    if let Ok(priority) = env::var(format!("{}MARK_RULE_PRIORITY", ENV_PREFIX)) {
        base_config.mark_rule_priority = parse_u32("MARK_RULE_PRIORITY", &priority)?;
    }

    // Format: NETNS_POLICY_ROUTING_PINNED_DESTINATIONS="fe80::/64,169.254.0.0/16"
    if let Ok(pinned) = env::var(format!("{}PINNED_DESTINATIONS", ENV_PREFIX)) {
        base_config.pinned_destinations = parse_list(&pinned);
    }

    Ok(base_config)
}

/// Split a comma separated list, dropping empty entries
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| {
        ConfigError::InvalidFormat(format!(
            "{}{} must be a number, got '{}'",
            ENV_PREFIX, key, value
        ))
    })
}
