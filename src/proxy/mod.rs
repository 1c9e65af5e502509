//! Minimal HTTP proxy host for the mirror pipeline
//!
//! Every proxied request takes the primary path (forwarded upstream
//! unchanged) while the mirror pipeline decides whether to send a copy
//! to the mirror. Mirror work never delays or alters the primary path.

pub mod error_response;
pub mod forward;
pub mod headers;
pub mod service;
pub mod types;

pub use service::MirrorProxyService;
pub use types::{ProxyConfig, ProxyError, ProxyResult};
