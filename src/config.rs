//! Service configuration from the environment.

use std::path::PathBuf;

use thiserror::Error;

use crate::services::DEFAULT_MAX_ATTEMPTS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("CHECKOUT_MAX_ATTEMPTS must be at least 1")]
    ZeroAttempts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Without a database the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    /// Order number attempts per checkout.
    pub checkout_max_attempts: u32,
    /// JSON product list loaded into the catalog at start-up.
    pub catalog_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            port: 8083,
            nats_url: None,
            checkout_max_attempts: DEFAULT_MAX_ATTEMPTS,
            catalog_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            database_url: text("DATABASE_URL"),
            database_max_connections: number("DATABASE_MAX_CONNECTIONS", text("DATABASE_MAX_CONNECTIONS"), defaults.database_max_connections)?,
            port: number("PORT", text("PORT"), defaults.port)?,
            nats_url: text("NATS_URL"),
            checkout_max_attempts: number("CHECKOUT_MAX_ATTEMPTS", text("CHECKOUT_MAX_ATTEMPTS"), defaults.checkout_max_attempts)?,
            catalog_file: text("CATALOG_FILE").map(PathBuf::from),
        };
        if config.checkout_max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(config)
    }
}

fn number<T: std::str::FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}
