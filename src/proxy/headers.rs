//! HTTP header and path constants for the proxy host

/// Header naming the upstream the original request is forwarded to
pub const X_TARGET_URL: &str = "x-target-url";

/// Header name for request ID used for tracing and correlation
pub const X_REQUEST_ID: &str = "x-request-id";

pub use crate::mirror::types::X_MIRRORED_FROM;

/// Well-known paths
pub mod paths {
    /// Default path when none is specified
    pub const DEFAULT: &str = "/";

    /// Health check endpoint path
    pub const HEALTH: &str = "/health";

    /// Runtime mirror options endpoint
    pub const MIRROR_OPTIONS: &str = "/_mirror/options";
}
