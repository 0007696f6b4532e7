//! Core types and shared functionality for shellcache.
//!
//! This crate provides:
//! - Versioned cache generations with a SQLite backend
//! - The lifecycle controller (install, activate, fetch routing)
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod manifest;
pub mod network;
pub mod worker;

pub use cache::{Cache, CacheDb, CacheStorage, Caches};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use http::{Headers, Request, RequestMode, Response};
pub use manifest::{AssetManifest, CacheName};
pub use network::Fetch;
pub use worker::{FetchDisposition, FetchEvent, ServiceHost, Worker, WorkerId, WorkerState};
