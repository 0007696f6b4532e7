//! Network client for shellcache.
//!
//! Provides the reqwest-backed [`Fetch`](shellcache_core::Fetch)
//! implementation the host hands to the lifecycle controller.

pub mod fetch;

pub use fetch::{FetchClient, FetchConfig};
