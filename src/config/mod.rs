//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// SQLite connection URL (e.g. `sqlite:relgraph.db` or `sqlite::memory:`)
    pub database_url: String,

    /// Maximum number of pooled connections
    pub database_max_connections: u32,

    /// Propagate original errors to clients instead of masking them
    pub debug_mode: bool,

    /// Reject selections naming fields unknown to the entity structure
    pub strict_selection: bool,

    /// Translation key used when a request does not select one
    pub default_translation: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            database_url: "sqlite:relgraph.db".to_string(),
            database_max_connections: 5,
            debug_mode: false,
            strict_selection: false,
            default_translation: "en".to_string(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .context("Invalid PORT")?,

            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),

            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .map(|s| s.parse())
                .transpose()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.database_max_connections),

            debug_mode: env_flag("DEBUG_MODE").unwrap_or(defaults.debug_mode),

            strict_selection: env_flag("STRICT_SELECTION").unwrap_or(defaults.strict_selection),

            default_translation: env::var("DEFAULT_TRANSLATION")
                .unwrap_or(defaults.default_translation),
        })
    }
}
