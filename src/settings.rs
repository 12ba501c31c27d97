use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};
use crate::lock::DEFAULT_LOCK_TTL_SECS;
use crate::store::MAX_BATCH_OPS;

pub const DB_FILE: &str = "tally.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Identity written to audit fields (archiving actor, import actor).
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default = "default_org")]
    pub org_id: String,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: i64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_actor() -> String {
    std::env::var("USER").unwrap_or_else(|_| "tally".to_string())
}

fn default_org() -> String {
    "default".to_string()
}

fn default_lock_ttl_secs() -> i64 {
    DEFAULT_LOCK_TTL_SECS
}

fn default_max_batch_size() -> usize {
    MAX_BATCH_OPS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            actor: default_actor(),
            org_id: default_org(),
            lock_ttl_secs: default_lock_ttl_secs(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(DB_FILE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl_secs <= 0 {
            return Err(TallyError::Settings(format!(
                "lock_ttl_secs must be positive, got {}",
                self.lock_ttl_secs
            )));
        }
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_OPS {
            return Err(TallyError::Settings(format!(
                "max_batch_size must be between 1 and {MAX_BATCH_OPS}, got {}",
                self.max_batch_size
            )));
        }
        Ok(())
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tally")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("tally")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| TallyError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

/// Settings with the command-line `--data-dir` override applied.
pub fn resolve(data_dir: Option<&str>) -> Result<Settings> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(dir);
    }
    settings.validate()?;
    Ok(settings)
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
