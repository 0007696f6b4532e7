//! Configuration validation rules.
//!
//! Checks `AppConfig` values after they have been loaded from environment,
//! files, or defaults.

use std::collections::HashSet;

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `cache_prefix`, `cache_version` or `user_agent` is empty
    /// - `manifest` is empty, has a path not starting with `/`, or repeats a path
    /// - `origin` is not an http(s) URL without a path
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_clients` or `client_idle_secs` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_prefix.is_empty() {
            return Err(invalid("cache_prefix", "must not be empty"));
        }
        if self.cache_version.is_empty() {
            return Err(invalid("cache_version", "must not be empty"));
        }

        self.validate_manifest()?;
        self.validate_origin()?;

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.max_clients == 0 {
            return Err(invalid("max_clients", "must be greater than 0"));
        }
        if self.client_idle_secs == 0 {
            return Err(invalid("client_idle_secs", "must be greater than 0"));
        }

        Ok(())
    }

    fn validate_manifest(&self) -> Result<(), ConfigError> {
        if self.manifest.is_empty() {
            return Err(invalid("manifest", "must list at least one asset"));
        }

        let mut seen = HashSet::new();
        for path in &self.manifest {
            if !path.starts_with('/') {
                return Err(invalid("manifest", format!("path must start with '/': {path}")));
            }
            if path.starts_with("//") {
                return Err(invalid("manifest", format!("path must not name another host: {path}")));
            }
            if !seen.insert(path.as_str()) {
                return Err(invalid("manifest", format!("duplicate path: {path}")));
            }
        }

        if !self.asset_manifest().has_app_shell() {
            tracing::warn!(
                manifest_len = self.manifest.len(),
                "manifest does not include the app shell '/'; offline navigations will fail"
            );
        }

        Ok(())
    }

    fn validate_origin(&self) -> Result<(), ConfigError> {
        let origin = url::Url::parse(&self.origin).map_err(|e| invalid("origin", e.to_string()))?;

        if !matches!(origin.scheme(), "http" | "https") {
            return Err(invalid("origin", format!("unsupported scheme: {}", origin.scheme())));
        }
        if origin.path() != "/" || origin.query().is_some() || origin.fragment().is_some() {
            return Err(invalid("origin", "must not carry a path, query or fragment"));
        }

        Ok(())
    }
}
