use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "CAMPSYNC_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 15_000,
        }
    }
}

/// Every polling cadence the engine runs on, named so the timing logic never
/// depends on a literal interval.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub dashboard_refresh_ms: u64,
    pub status_poll_ms: u64,
    pub click_flush_ms: u64,
    pub countdown_tick_ms: u64,
    /// Slack added past the server deadline before the leader finalizes, so
    /// a marginally fast local clock cannot close the window early.
    pub finalize_grace_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dashboard_refresh_ms: 10_000,
            status_poll_ms: 3_000,
            click_flush_ms: 2_000,
            countdown_tick_ms: 250,
            finalize_grace_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub path: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            if let Ok(file_config) = toml::from_str::<Config>(&raw) {
                config = file_config;
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var(format!("{}API_BASE_URL", ENV_PREFIX)) {
            self.api.base_url = Some(val);
        }
        if let Ok(val) = env::var(format!("{}API_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.api.timeout_ms = ms;
            }
        }

        if let Ok(val) = env::var(format!("{}DASHBOARD_REFRESH_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.sync.dashboard_refresh_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}STATUS_POLL_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.sync.status_poll_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}CLICK_FLUSH_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.sync.click_flush_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}COUNTDOWN_TICK_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.sync.countdown_tick_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}FINALIZE_GRACE_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.sync.finalize_grace_ms = ms;
            }
        }

        if let Ok(val) = env::var(format!("{}CACHE_PATH", ENV_PREFIX)) {
            self.cache.path = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(url) = self.api.base_url.as_deref() {
            if url.trim().is_empty() {
                return Err("api.base_url must not be blank".into());
            }
        }
        if self.api.timeout_ms == 0 {
            return Err("api.timeout_ms must be non-zero".into());
        }
        if self.sync.dashboard_refresh_ms == 0 {
            return Err("sync.dashboard_refresh_ms must be non-zero".into());
        }
        if self.sync.status_poll_ms == 0 {
            return Err("sync.status_poll_ms must be non-zero".into());
        }
        if self.sync.click_flush_ms == 0 {
            return Err("sync.click_flush_ms must be non-zero".into());
        }
        if self.sync.countdown_tick_ms == 0 {
            return Err("sync.countdown_tick_ms must be non-zero".into());
        }
        if self.sync.click_flush_ms < self.sync.countdown_tick_ms {
            return Err("sync.click_flush_ms must be >= sync.countdown_tick_ms".into());
        }
        Ok(())
    }

    /// The base url is optional in the file so `config-init` output is usable
    /// as-is, but every network operation needs it.
    pub fn require_base_url(&self) -> Result<&str, Box<dyn std::error::Error>> {
        match self.api.base_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err("api.base_url is not configured (set it in config.toml or CAMPSYNC_API_BASE_URL)".into()),
        }
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let base = env::var("APPDATA")
        .or_else(|_| env::var("HOME").map(|h| format!("{h}/.config")))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&base).join("CampSync").join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
