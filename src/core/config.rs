use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const REMOTE_RATES_URL_ENV: &str = "REMOTE_RATES_URL";
pub const SOURCES_ENV: &str = "SOURCES";
pub const REFRESH_INTERVAL_MS_ENV: &str = "REFRESH_INTERVAL_MS";

const DEFAULT_SOURCES: [&str; 4] = ["bcv", "binance", "bybit", "paralelo"];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
}

impl ProviderConfig {
    fn new(base_url: &str) -> Option<Self> {
        Some(Self {
            base_url: base_url.to_string(),
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub bcv: Option<ProviderConfig>,
    pub binance: Option<ProviderConfig>,
    pub bybit: Option<ProviderConfig>,
    pub dolarapi: Option<ProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            bcv: ProviderConfig::new("https://www.bcv.org.ve"),
            binance: ProviderConfig::new("https://p2p.binance.com"),
            bybit: ProviderConfig::new("https://api2.bybit.com"),
            dolarapi: ProviderConfig::new("https://ve.dolarapi.com"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Full snapshot to use as the base of every cycle instead of the cache.
    #[serde(default)]
    pub remote_rates_url: Option<String>,
    /// Enabled source ids. Ids without an adapter are still published when a
    /// remote snapshot carries them.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

fn default_sources() -> Vec<String> {
    DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect()
}

fn default_refresh_interval_ms() -> u64 {
    60_000
}

fn default_request_timeout_secs() -> u64 {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_rates_url: None,
            sources: default_sources(),
            refresh_interval_ms: default_refresh_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config file (explicit path, else the default location if present,
    /// else built-in defaults) and applies environment overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let path = Self::default_config_path()?;
                if path.exists() {
                    Self::load_from_path(&path)?
                } else {
                    debug!("No config file at {}, using defaults", path.display());
                    Self::default()
                }
            }
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("ve", "tasas", "tasas")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config.normalized())
    }

    /// Applies `REMOTE_RATES_URL`, `SOURCES` and `REFRESH_INTERVAL_MS` from `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup(REMOTE_RATES_URL_ENV) {
            self.remote_rates_url = Some(url);
        }
        if let Some(list) = lookup(SOURCES_ENV) {
            self.sources = list.split(',').map(str::to_string).collect();
        }
        if let Some(raw) = lookup(REFRESH_INTERVAL_MS_ENV) {
            self.refresh_interval_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {REFRESH_INTERVAL_MS_ENV}: '{raw}'"))?;
        }
        if self.refresh_interval_ms == 0 {
            return Err(anyhow!("Refresh interval must be greater than zero"));
        }
        Ok(self.normalized())
    }

    fn normalized(mut self) -> Self {
        self.remote_rates_url = self
            .remote_rates_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let mut sources: Vec<String> = Vec::new();
        for id in self.sources.iter().map(|s| s.trim().to_lowercase()) {
            if !id.is_empty() && !sources.contains(&id) {
                sources.push(id);
            }
        }
        self.sources = sources;
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.sources.iter().any(|s| s == id)
    }
}
