//! Traffic Mirror - duplicates proxied HTTP requests to a mirror destination
//!
//! Every eligible request seen by the proxy is copied, scrubbed of
//! credentials, retargeted at the mirror, and dispatched fire-and-forget,
//! while the original continues to its real destination untouched.

pub mod application;
pub mod config;
pub mod error;
pub mod mirror;
pub mod proxy;

pub use application::Application;
pub use error::{Error, Result};
