use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DATA_DIR: &str = ".tracedash";
const CONFIG_FILE: &str = "config.json";
const API_URL_VAR: &str = "TRACEDASH_API_URL";
const TIMEOUT_VAR: &str = "TRACEDASH_TIMEOUT_SECS";

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub timeout: Duration,
    pub data_dir: PathBuf,
}

/// On-disk shape of `~/.tracedash/config.json`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Resolve configuration: environment, then `.env`, then the config file, then defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = data_dir();
        let file = read_config_file(&data_dir.join(CONFIG_FILE))?;

        let mut api_url = env::var(API_URL_VAR).ok();
        let mut timeout = env::var(TIMEOUT_VAR).ok();

        if api_url.is_none() || timeout.is_none() {
            dotenv::dotenv().ok();
            api_url = api_url.or_else(|| env::var(API_URL_VAR).ok());
            timeout = timeout.or_else(|| env::var(TIMEOUT_VAR).ok());
        }

        Self::resolve(api_url, timeout, file, data_dir)
    }

    fn resolve(
        api_url: Option<String>,
        timeout: Option<String>,
        file: ConfigFile,
        data_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let timeout = match timeout {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                    key: TIMEOUT_VAR,
                    value: raw.clone(),
                })?;
                Duration::from_secs(secs)
            }
            None => file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        };

        let api_url = api_url
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        Ok(Config {
            api_url: api_url.trim_end_matches('/').to_string(),
            timeout,
            data_dir,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tracedash.db")
    }
}

pub fn data_dir() -> PathBuf {
    home_dir().unwrap_or_else(env::temp_dir).join(DATA_DIR)
}

pub fn config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

fn read_config_file(path: &PathBuf) -> Result<ConfigFile, ConfigError> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Merge `update` into the config file at `path` and write it back.
pub fn save_config(path: &PathBuf, update: &ConfigFile) -> Result<(), ConfigError> {
    let mut current = read_config_file(path)?;
    if update.api_url.is_some() {
        current.api_url = update.api_url.clone();
    }
    if update.timeout_secs.is_some() {
        current.timeout_secs = update.timeout_secs;
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(&current)?;
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path)?;
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}
