//! Configuration loading.
//!
//! Configuration lives in a JSON file at `$MENUCACHE_CONFIG`, falling back to
//! `~/.config/menucache/config.json`. A `$HERE` token in `db_path` expands to
//! the directory holding the config file, so a checkout can keep its
//! database next to its config.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::CredentialStore;
use crate::fetcher::DEFAULT_CUTOFF_HOUR;
use crate::providers::html::DEFAULT_CALENDAR_BASE_URL;
use crate::providers::sage::DEFAULT_SAGE_BASE_URL;
use crate::providers::SageCredentials;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "menucache";

const CONFIG_FILE: &str = "config.json";

const DB_FILE: &str = "menu.db";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MENUCACHE_CONFIG";

/// Environment variable that overrides the Sage password.
pub const PASSWORD_ENV: &str = "SAGE_PASSWORD";

const HERE_TOKEN: &str = "$HERE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Html {
        #[serde(default = "default_calendar_base_url")]
        base_url: String,
        school: String,
        menu: String,
    },
    Sage {
        #[serde(default = "default_sage_base_url")]
        base_url: String,
        email: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        unit_id: i64,
        menu_id: i64,
    },
}

fn default_calendar_base_url() -> String {
    DEFAULT_CALENDAR_BASE_URL.to_string()
}

fn default_sage_base_url() -> String {
    DEFAULT_SAGE_BASE_URL.to_string()
}

fn default_cutoff_hour() -> u32 {
    DEFAULT_CUTOFF_HOUR
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database path; `$HERE` expands to the config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    #[serde(default = "default_cutoff_hour")]
    pub cutoff_hour: u32,
    /// Dining hall offset from UTC; host local time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub notify_missing_menu: bool,
}

impl Config {
    /// Loads the config from `$MENUCACHE_CONFIG` or the default location.
    pub fn load() -> Result<(Self, PathBuf)> {
        let path = Self::config_path()?;
        let config = Self::load_from(&path)?;
        Ok((config, path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(explicit));
        }
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Resolved database path for a config loaded from `config_path`.
    pub fn database_path(&self, config_path: &Path) -> Result<PathBuf> {
        match &self.db_path {
            Some(raw) => {
                let here = config_path.parent().unwrap_or_else(|| Path::new("."));
                Ok(PathBuf::from(raw.replace(HERE_TOKEN, &here.to_string_lossy())))
            }
            None => {
                let cache_dir = dirs::cache_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
                Ok(cache_dir.join(APP_NAME).join(DB_FILE))
            }
        }
    }
}

impl ProviderConfig {
    /// Sage login credentials: `$SAGE_PASSWORD`, then the config file, then
    /// the OS keychain.
    pub fn sage_credentials(&self) -> Result<Option<SageCredentials>> {
        let ProviderConfig::Sage { email, password, .. } = self else {
            return Ok(None);
        };
        let password = resolve_password(
            email,
            std::env::var(PASSWORD_ENV).ok(),
            password.clone(),
            CredentialStore::get_password,
        )?;
        Ok(Some(SageCredentials {
            email: email.clone(),
            password,
        }))
    }
}

fn resolve_password(
    email: &str,
    from_env: Option<String>,
    from_config: Option<String>,
    keychain: impl FnOnce(&str) -> Result<String>,
) -> Result<String> {
    if let Some(password) = from_env.filter(|p| !p.is_empty()) {
        return Ok(password);
    }
    if let Some(password) = from_config.filter(|p| !p.is_empty()) {
        return Ok(password);
    }
    keychain(email).with_context(|| {
        format!("No Sage password for {}: set {} or store one in the keychain", email, PASSWORD_ENV)
    })
}
