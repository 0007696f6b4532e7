//! Host runtime for shellcache: worker registration, client control and the
//! HTTP proxy that feeds intercepted requests to the lifecycle controller.

pub mod clients;
pub mod error;
pub mod proxy;
pub mod registration;

pub use clients::{ClientId, Clients};
pub use registration::{Dispatched, Registration};
