//! Deployment configuration with layered loading.
//!
//! Loading precedence (highest wins):
//!
//! 1. Environment variables (SHELLCACHE_*)
//! 2. TOML config file (if SHELLCACHE_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The version identifier and asset manifest are fixed for the life of a
//! deployment; changing either requires a restart, which provisions a new
//! generation.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::manifest::{AssetManifest, CACHE_PREFIX, CACHE_VERSION, CacheName, DEFAULT_ASSETS};

mod validation;

pub use validation::ConfigError;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "SHELLCACHE_CONFIG_FILE";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SHELLCACHE_";

/// Deployment configuration for the cache agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Prefix shared by all generations this deployment owns.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Version identifier. Bumping it invalidates every older generation.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Paths pre-cached on install, in order.
    #[serde(default = "default_manifest")]
    pub manifest: Vec<String>,

    /// Origin of the application whose requests are intercepted.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Address the agent listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Path to the SQLite cache store.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent for requests the agent originates.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum request or response body size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Network timeout in milliseconds, enforced by the HTTP client.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between install attempts after a failed install. 0 disables.
    #[serde(default = "default_install_retry_secs")]
    pub install_retry_secs: u64,

    /// Most clients tracked at once; the least recently seen is dropped.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Seconds after which a silent client is forgotten.
    #[serde(default = "default_client_idle_secs")]
    pub client_idle_secs: u64,
}

fn default_cache_prefix() -> String {
    CACHE_PREFIX.into()
}

fn default_cache_version() -> String {
    CACHE_VERSION.into()
}

fn default_manifest() -> Vec<String> {
    DEFAULT_ASSETS.iter().map(|p| p.to_string()).collect()
}

fn default_origin() -> String {
    "http://127.0.0.1:8501".into()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./shellcache.sqlite")
}

fn default_user_agent() -> String {
    "shellcache/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_install_retry_secs() -> u64 {
    30
}

fn default_max_clients() -> usize {
    1024
}

fn default_client_idle_secs() -> u64 {
    1800
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_prefix: default_cache_prefix(),
            cache_version: default_cache_version(),
            manifest: default_manifest(),
            origin: default_origin(),
            listen_addr: default_listen_addr(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            install_retry_secs: default_install_retry_secs(),
            max_clients: default_max_clients(),
            client_idle_secs: default_client_idle_secs(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay between install attempts, if retries are enabled.
    pub fn install_retry(&self) -> Option<Duration> {
        (self.install_retry_secs > 0).then(|| Duration::from_secs(self.install_retry_secs))
    }

    pub fn client_idle(&self) -> Duration {
        Duration::from_secs(self.client_idle_secs)
    }

    /// Name of the generation this deployment provisions.
    pub fn cache_name(&self) -> CacheName {
        CacheName::new(&self.cache_prefix, &self.cache_version)
    }

    pub fn asset_manifest(&self) -> AssetManifest {
        AssetManifest::new(self.manifest.iter().cloned())
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, a value cannot be
    /// parsed, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider stack used by [`AppConfig::load`].
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Extract and validate a configuration from any provider stack.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
