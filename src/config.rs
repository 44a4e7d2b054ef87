//! User configuration, read from `config.toml` in the platform config dir.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::assignment::UNLOCK_THRESHOLD;
use crate::models::{DEFAULT_DAILY_CAP, DEFAULT_DAILY_NEW_GOAL, DEFAULT_TARGET_DAYS};
use crate::queue::DEFAULT_BATCH_SIZE;
use crate::scheduler::Policy;

const APP_DIR: &str = "blindspot";
const DEFAULT_DB_NAME: &str = "blindspot.db";
pub const DB_ENV_VAR: &str = "BLINDSPOT_DB";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Study settings applied the first time a user shows up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDefaults {
    pub target_days: u32,
    pub daily_cap: u32,
    pub daily_new_goal: u32,
}

impl Default for SettingsDefaults {
    fn default() -> Self {
        Self {
            target_days: DEFAULT_TARGET_DAYS,
            daily_cap: DEFAULT_DAILY_CAP,
            daily_new_goal: DEFAULT_DAILY_NEW_GOAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User id used when `--user` is not given.
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    pub unlock_threshold: u32,
    pub batch_size: usize,
    /// Base seed for topic selection and queue shuffling.
    pub rng_seed: u64,
    pub defaults: SettingsDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: "default".to_string(),
            db_path: None,
            unlock_threshold: UNLOCK_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            rng_seed: 0x5eed,
            defaults: SettingsDefaults::default(),
        }
    }
}

fn app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    pub fn default_path() -> PathBuf {
        app_dir().join("config.toml")
    }

    /// Load config from `path`, returning defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Database location: `BLINDSPOT_DB`, then `db_path`, then the config dir.
    pub fn db_path(&self) -> PathBuf {
        resolve_db_path(std::env::var(DB_ENV_VAR).ok(), self.db_path.as_deref())
    }

    pub fn policy(&self) -> Policy {
        Policy {
            unlock_threshold: self.unlock_threshold.max(1),
            batch_size: self.batch_size.max(1),
            target_days: self.defaults.target_days,
            daily_cap: self.defaults.daily_cap,
            daily_new_goal: self.defaults.daily_new_goal,
        }
    }
}

fn resolve_db_path(env: Option<String>, configured: Option<&Path>) -> PathBuf {
    if let Some(path) = env.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    let dir = app_dir();
    fs::create_dir_all(&dir).ok();
    dir.join(DEFAULT_DB_NAME)
}
