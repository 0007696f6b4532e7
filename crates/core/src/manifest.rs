//! Version identifier, generation naming and the pre-cached asset list.

use serde::{Deserialize, Serialize};

/// Prefix shared by every generation this system owns.
pub const CACHE_PREFIX: &str = "lge-cache-";

/// Current version identifier. Bump this to invalidate old generations.
pub const CACHE_VERSION: &str = "lge-v1.0.0";

/// Path of the app shell used as the offline fallback for documents.
pub const APP_SHELL: &str = "/";

/// Assets that must be stored before a generation is ready.
pub const DEFAULT_ASSETS: &[&str] = &[
    APP_SHELL,
    "/assets/favicon.ico",
    "/assets/favicon.png",
    "/assets/favicon-16x16.png",
    "/assets/favicon-32x32.png",
    "/assets/favicon-180x180.png",
    "/assets/favicon-192x192.png",
    "/assets/favicon-256x256.png",
    "/assets/favicon-512x512.png",
    "/assets/apple-touch-icon.png",
    "/assets/manifest-fullscreen.json",
];

/// Name of a cache generation: prefix followed by the version identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheName {
    prefix: String,
    name: String,
}

impl CacheName {
    pub fn new(prefix: &str, version: &str) -> Self {
        Self { prefix: prefix.to_string(), name: format!("{prefix}{version}") }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `other` is one of ours but not this generation.
    pub fn is_stale(&self, other: &str) -> bool {
        other.starts_with(&self.prefix) && other != self.name
    }
}

impl Default for CacheName {
    fn default() -> Self {
        Self::new(CACHE_PREFIX, CACHE_VERSION)
    }
}

impl std::fmt::Display for CacheName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Ordered list of request paths pre-cached on install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest(Vec<String>);

impl AssetManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the app shell is pre-cached.
    pub fn has_app_shell(&self) -> bool {
        self.0.iter().any(|p| p == APP_SHELL)
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::new(DEFAULT_ASSETS.iter().copied())
    }
}
