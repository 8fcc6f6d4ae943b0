//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Lock engine tuning (default balance, tick size, host app id)
//! - Reward amounts and the judge site URL
//! - The user's judge handle
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::error::ConfigError;

/// Canonical starting balance for a fresh install: two minutes.
pub const DEFAULT_BALANCE_MS: u64 = 120_000;

/// Lock engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_balance_ms")]
    pub default_balance_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// How often the engine re-reads storage for writes made by other
    /// processes (restricted apps, rewards while exhausted).
    #[serde(default = "default_sync_ms")]
    pub sync_ms: u64,
    /// Identifier of the hosting app. Its own window changes are ignored.
    #[serde(default = "default_host_app_id")]
    pub host_app_id: String,
    /// Keep the overlay after leaving an exhausted app until the balance
    /// becomes positive again.
    #[serde(default)]
    pub hold_overlay_after_exhaustion: bool,
    /// Apps recorded as restricted when the set is still empty.
    #[serde(default = "default_restricted")]
    pub default_restricted: Vec<String>,
}

/// Reward configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_per_problem_ms")]
    pub per_problem_ms: u64,
    #[serde(default = "default_judge_url")]
    pub judge_url: String,
    /// How many recent submissions to inspect per verification.
    #[serde(default = "default_recent_submissions")]
    pub recent_submissions: u32,
}

/// User identity on the judge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub handle: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub reward: RewardConfig,
    #[serde(default)]
    pub user: UserConfig,
}

// Default functions
fn default_balance_ms() -> u64 {
    DEFAULT_BALANCE_MS
}
fn default_tick_ms() -> u64 {
    1_000
}
fn default_sync_ms() -> u64 {
    2_000
}
fn default_host_app_id() -> String {
    "com.example.codeforcesapplocker".into()
}
fn default_restricted() -> Vec<String> {
    vec![
        "com.instagram.android".into(),
        "com.google.android.youtube".into(),
        "com.zhiliaoapp.musically".into(),
    ]
}
fn default_per_problem_ms() -> u64 {
    30 * 60 * 1000
}
fn default_judge_url() -> String {
    "https://codeforces.com".into()
}
fn default_recent_submissions() -> u32 {
    10
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_balance_ms: default_balance_ms(),
            tick_ms: default_tick_ms(),
            sync_ms: default_sync_ms(),
            host_app_id: default_host_app_id(),
            hold_overlay_after_exhaustion: false,
            default_restricted: default_restricted(),
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            per_problem_ms: default_per_problem_ms(),
            judge_url: default_judge_url(),
            recent_submissions: default_recent_submissions(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                        serde_json::Value::Number(n.into())
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path,
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.clone(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and persist. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Reject values the lock engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.tick_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "lock.tick_ms".into(),
                message: "tick must be at least 1 ms".into(),
            });
        }
        if self.lock.sync_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "lock.sync_ms".into(),
                message: "sync interval must be at least 1 ms".into(),
            });
        }
        if self.lock.host_app_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "lock.host_app_id".into(),
                message: "host app id must not be blank".into(),
            });
        }
        Ok(())
    }
}
