//! Runtime configuration resolved from the process environment.
//!
//! # Invariants
//! - Missing variables fall back to defaults; malformed ones are errors.
//! - Logging stays disabled unless a log directory is configured.

use crate::logging::{default_log_level, normalize_level};
use std::path::PathBuf;

pub const DB_PATH_ENV: &str = "BILLSPLIT_DB_PATH";
pub const LOG_LEVEL_ENV: &str = "BILLSPLIT_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "BILLSPLIT_LOG_DIR";
pub const DEFAULT_DB_FILE_NAME: &str = "billsplit.sqlite3";

/// Resolved settings for opening storage and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub log_level: &'static str,
    /// Absolute directory for rolling logs; `None` disables file logging.
    pub log_dir: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    /// - Blank database path.
    /// - Unsupported log level.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(DB_PATH_ENV) {
            let trimmed = path.trim();
            if trimmed.is_empty() {
                return Err(format!("{DB_PATH_ENV} cannot be blank"));
            }
            config.db_path = PathBuf::from(trimmed);
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            config.log_level = normalize_level(&level)?;
        }
        config.log_dir = lookup(LOG_DIR_ENV)
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty());

        Ok(config)
    }
}
