mod config;
pub mod database;

pub use config::{Config, LockConfig, RewardConfig, UserConfig, DEFAULT_BALANCE_MS};
pub use database::{Database, SharedDatabase};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/codeearn[-dev]/` based on CODEEARN_ENV.
///
/// Set CODEEARN_ENV=dev to use development data directory, or
/// CODEEARN_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("CODEEARN_DATA_DIR") {
        Some(custom) => PathBuf::from(custom),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("CODEEARN_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("codeearn-dev")
            } else {
                base_dir.join("codeearn")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
