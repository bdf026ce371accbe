//! Session controller configuration.
//!
//! Loaded from environment variables with sensible defaults. Relay and
//! room are per-join arguments, not configuration; what lives here is
//! the participant identity and the ambient knobs.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default audio monitor sampling interval in milliseconds.
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 100;

/// Default diagnostic log capacity.
pub const DEFAULT_DIAG_CAPACITY: usize = 50;

/// Default display name published with the local broadcast.
pub const DEFAULT_DISPLAY_NAME: &str = "User";

/// Session controller configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Unique identifier for the local participant; the final segment
    /// of the local publish path.
    pub participant_id: String,

    /// Display name published with the local broadcast.
    pub display_name: String,

    /// Audio monitor sampling interval in milliseconds (default: 100).
    pub monitor_interval_ms: u64,

    /// Diagnostic log capacity (default: 50).
    pub diag_capacity: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            participant_id: generate_participant_id(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            diag_capacity: DEFAULT_DIAG_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let participant_id = vars
            .get("SC_PARTICIPANT_ID")
            .cloned()
            .unwrap_or_else(generate_participant_id);

        let display_name = vars
            .get("SC_DISPLAY_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        let monitor_interval_ms = match vars.get("SC_MONITOR_INTERVAL_MS") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("SC_MONITOR_INTERVAL_MS: {raw}"))
            })?,
            None => DEFAULT_MONITOR_INTERVAL_MS,
        };

        let diag_capacity = match vars.get("SC_DIAG_CAPACITY") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("SC_DIAG_CAPACITY: {raw}")))?,
            None => DEFAULT_DIAG_CAPACITY,
        };

        Ok(Config {
            participant_id,
            display_name,
            monitor_interval_ms,
            diag_capacity,
        })
    }
}

/// Generate a short random participant id (8 hex chars of a UUID).
fn generate_participant_id() -> String {
    let id = uuid::Uuid::new_v4().to_string();
    id.get(..8).unwrap_or("00000000").to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load");

        assert_eq!(config.participant_id.len(), 8);
        assert_eq!(config.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(config.monitor_interval_ms, DEFAULT_MONITOR_INTERVAL_MS);
        assert_eq!(config.diag_capacity, DEFAULT_DIAG_CAPACITY);
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            ("SC_PARTICIPANT_ID".to_string(), "abc123".to_string()),
            ("SC_DISPLAY_NAME".to_string(), "Alice".to_string()),
            ("SC_MONITOR_INTERVAL_MS".to_string(), "250".to_string()),
            ("SC_DIAG_CAPACITY".to_string(), "20".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load");
        assert_eq!(config.participant_id, "abc123");
        assert_eq!(config.display_name, "Alice");
        assert_eq!(config.monitor_interval_ms, 250);
        assert_eq!(config.diag_capacity, 20);
    }

    #[test]
    fn test_from_vars_invalid_interval() {
        let vars = HashMap::from([(
            "SC_MONITOR_INTERVAL_MS".to_string(),
            "not-a-number".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Config::from_vars(&HashMap::new()).unwrap();
        let b = Config::from_vars(&HashMap::new()).unwrap();
        assert_ne!(a.participant_id, b.participant_id);
    }
}
