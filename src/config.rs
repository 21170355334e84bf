// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything the streak engine needs is enumerated here and handed to the
//! services explicitly; nothing reads the environment after startup.

use std::env;
use std::str::FromStr;

/// Which backing store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    /// In-process store (tests and local runs; data is lost on restart)
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(StoreBackend::Firestore),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::Invalid("STORE_BACKEND", s.to_string())),
        }
    }
}

/// Firestore limits batch/transaction writes to 500 operations.
pub const MAX_BATCH_SIZE: usize = 500;

/// Tunables for the streak engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakConfig {
    /// Ledger window read by finalize (extended while the chain continues)
    pub lookback_days: u32,
    /// Consecutive free freezes a subscriber gets before tokens are needed
    pub subscriber_free_freezes: u32,
    /// Maximum writes per store batch
    pub batch_size: usize,
    /// Local hour from which an undone day counts as at risk
    pub reminder_hour: u32,
    /// Ledger rows returned by the status endpoint
    pub history_days: u32,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            subscriber_free_freezes: 2,
            // Headroom below MAX_BATCH_SIZE.
            batch_size: 400,
            reminder_hour: 20,
            history_days: 30,
        }
    }
}

impl StreakConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            lookback_days: parse_var("STREAK_LOOKBACK_DAYS", defaults.lookback_days)?,
            subscriber_free_freezes: parse_var(
                "STREAK_SUBSCRIBER_FREE_FREEZES",
                defaults.subscriber_free_freezes,
            )?,
            batch_size: parse_var("STREAK_BATCH_SIZE", defaults.batch_size)?,
            reminder_hour: parse_var("STREAK_REMINDER_HOUR", defaults.reminder_hour)?,
            history_days: parse_var("STREAK_HISTORY_DAYS", defaults.history_days)?,
        };

        if config.lookback_days == 0 {
            return Err(ConfigError::Invalid("STREAK_LOOKBACK_DAYS", "0".to_string()));
        }
        if config.batch_size == 0 || config.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(
                "STREAK_BATCH_SIZE",
                config.batch_size.to_string(),
            ));
        }
        if config.reminder_hour > 23 {
            return Err(ConfigError::Invalid(
                "STREAK_REMINDER_HOUR",
                config.reminder_hour.to_string(),
            ));
        }

        Ok(config)
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontend URL for CORS
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Backing store
    pub store_backend: StoreBackend,
    /// Streak engine tunables
    pub streak: StreakConfig,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            streak: StreakConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            store_backend: env::var("STORE_BACKEND")
                .map(|v| v.parse())
                .unwrap_or(Ok(StoreBackend::Firestore))?,
            streak: StreakConfig::from_env()?,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Single test touching the environment to avoid races between tests.
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("STREAK_LOOKBACK_DAYS", "30");
        env::remove_var("STREAK_BATCH_SIZE");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.streak.lookback_days, 30);
        assert_eq!(config.streak.batch_size, 400);
        assert_eq!(config.streak.subscriber_free_freezes, 2);

        env::set_var("STREAK_LOOKBACK_DAYS", "lots");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("STREAK_LOOKBACK_DAYS", _)));

        env::set_var("STREAK_LOOKBACK_DAYS", "90");
        env::set_var("STREAK_BATCH_SIZE", "501");
        assert!(Config::from_env().is_err());
        env::remove_var("STREAK_BATCH_SIZE");

        env::set_var("STORE_BACKEND", "postgres");
        assert!(Config::from_env().is_err());

        env::remove_var("STREAK_LOOKBACK_DAYS");
        env::remove_var("STORE_BACKEND");
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("Firestore".parse::<StoreBackend>().unwrap(), StoreBackend::Firestore);
        assert_eq!(" memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
    }
}
