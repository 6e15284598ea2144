//! Configuration management.
//!
//! This module handles loading and saving the configuration shared by every
//! table view: the query endpoint, optional bearer token, default page size,
//! debounce window and request timeout.
//!
//! Configuration is stored at `~/.config/rowcache/config.json`. Environment
//! variables `ROWCACHE_ENDPOINT` and `ROWCACHE_TOKEN` override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::coordinator::DEFAULT_DEBOUNCE_MS;
use crate::source::http::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config directory paths
const APP_NAME: &str = "rowcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Rows per page when nothing else is configured.
pub const DEFAULT_PAGE_SIZE: usize = 25;

pub const ENDPOINT_ENV: &str = "ROWCACHE_ENDPOINT";
pub const TOKEN_ENV: &str = "ROWCACHE_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub page_size: usize,
    pub debounce_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            page_size: DEFAULT_PAGE_SIZE,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Per-view knobs handed to a `TableController`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSettings {
    pub page_size: usize,
    pub debounce: Duration,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Config::default().view_settings()
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `ROWCACHE_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(std::env::var(ENDPOINT_ENV).ok(), std::env::var(TOKEN_ENV).ok());
    }

    fn apply_overrides(&mut self, endpoint: Option<String>, token: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
            self.endpoint = Some(endpoint);
        }
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.token = Some(token);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn view_settings(&self) -> ViewSettings {
        ViewSettings {
            page_size: self.page_size.max(1),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}
