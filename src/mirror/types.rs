//! Type definitions for the mirror pipeline

use bytes::Bytes;
use http::Method;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ========== Constants ==========

/// Provenance header carried by every mirrored request
pub const X_MIRRORED_FROM: &str = "x-mirrored-from";

/// Headers that must never reach a mirror endpoint
pub const SCRUBBED_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

/// Pattern used when no match pattern is configured
pub const MATCH_EVERYTHING: &str = ".*";

pub const SCHEME_HTTPS: &str = "https";
pub const SCHEME_HTTP: &str = "http";
pub const HTTPS_DEFAULT_PORT: u16 = 443;
pub const HTTP_DEFAULT_PORT: u16 = 80;

/// Default port for a scheme: 443 for https, 80 for everything else
pub fn default_port(scheme: &str) -> u16 {
    if scheme.eq_ignore_ascii_case(SCHEME_HTTPS) {
        HTTPS_DEFAULT_PORT
    } else {
        HTTP_DEFAULT_PORT
    }
}

/// Render `scheme://host[:port]path`, omitting the port when it is the scheme default
pub fn canonical_url(scheme: &str, host: &str, port: u16, path: &str) -> String {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };

    if port == default_port(scheme) {
        format!("{scheme}://{host}{path}")
    } else {
        format!("{scheme}://{host}:{port}{path}")
    }
}

// ========== Capacity Types ==========

/// Number of mirrored requests that may wait for dispatch
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |capacity: &usize| *capacity > 0),
)]
pub struct QueueCapacity(usize);

impl Default for QueueCapacity {
    fn default() -> Self {
        Self::try_new(1024).expect("1024 is a valid capacity")
    }
}

// ========== Headers ==========

/// Ordered header multimap with case-insensitive name lookup
///
/// Values are kept as raw bytes so non-UTF-8 (obs-text) values survive
/// the copy unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, Bytes)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_vec(headers: Vec<(String, Bytes)>) -> Self {
        Self(headers)
    }

    /// Append a value, keeping any existing values for the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single value
    ///
    /// The value takes the position of the first existing entry, or is
    /// appended when there is none.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        let name = name.into();
        let value = value.into();

        let Some(first) = self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) else {
            self.0.push((name, value));
            return;
        };

        self.0[first].1 = value;
        let mut index = 0;
        self.0.retain(|(k, _)| {
            let keep = index <= first || !k.eq_ignore_ascii_case(&name);
            index += 1;
            keep
        });
    }

    /// Remove every value for `name`, returning how many were dropped
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    /// First value for `name`, when it is valid UTF-8
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_bytes(name)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    /// First value for `name` as raw bytes
    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_bytes(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<(String, Bytes)> {
        self.0
    }
}

/// Collect headers from an `http::HeaderMap`, preserving order and value bytes
impl From<&http::HeaderMap> for Headers {
    fn from(map: &http::HeaderMap) -> Self {
        Self(
            map.iter()
                .map(|(k, v)| (k.to_string(), Bytes::copy_from_slice(v.as_bytes())))
                .collect(),
        )
    }
}

// ========== Requests ==========

/// Whether the proxy engine produced this request by replaying an earlier flow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayOrigin {
    #[default]
    None,
    Request,
    Response,
}

/// A request as the proxy engine saw it at interception time
///
/// `path` is the request target exactly as the engine exposes it, so it
/// carries the query string (`/a/b?x=1`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedRequest {
    pub method: Method,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub headers: Headers,
    pub body: Bytes,
    pub is_replay: ReplayOrigin,
}

impl ObservedRequest {
    /// Build a request from an absolute URL, defaulting the port per scheme
    pub fn from_url(method: Method, url: &str) -> Result<Self, MirrorError> {
        let parsed =
            url::Url::parse(url).map_err(|e| MirrorError::InvalidRequestUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| MirrorError::InvalidRequestUrl(format!("{url}: missing host")))?;
        let scheme = parsed.scheme().to_string();
        let port = parsed.port().unwrap_or_else(|| default_port(&scheme));

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            method,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            scheme,
            port,
            path,
            headers: Headers::new(),
            body: Bytes::new(),
            is_replay: ReplayOrigin::None,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_replay(mut self, origin: ReplayOrigin) -> Self {
        self.is_replay = origin;
        self
    }

    /// Path without the query string
    pub fn path_only(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(p, _)| p)
    }

    pub fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, q)| q)
    }

    /// Full URL used for pattern matching and provenance
    pub fn canonical_url(&self) -> String {
        canonical_url(&self.scheme, &self.host, self.port, &self.path)
    }
}

/// Validated destination parsed from the configured mirror base URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

impl MirrorTarget {
    /// Parse a base URL; requires a scheme and a host
    pub fn parse(base_url: &str) -> Result<Self, MirrorError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| MirrorError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MirrorError::InvalidBaseUrl(format!("{base_url}: missing host")))?;
        let scheme = parsed.scheme().to_string();
        let port = parsed.port().unwrap_or_else(|| default_port(&scheme));

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            base_path: parsed.path().to_string(),
            scheme,
        })
    }

    /// `host[:port]`, omitting the port when it is the scheme default
    pub fn authority(&self) -> String {
        let url = canonical_url(&self.scheme, &self.host, self.port, "");
        url.split_once("://").map_or(url.clone(), |(_, authority)| authority.to_string())
    }

    /// True when `host`/`port` already address this target
    pub fn addresses(&self, host: &str, port: u16) -> bool {
        self.host.eq_ignore_ascii_case(host) && self.port == port
    }
}

/// Out-of-band metadata attached to a mirrored request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MirrorMetadata {
    pub mirrored: bool,
}

/// Independent, retargeted copy of an observed request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirroredRequest {
    pub method: Method,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub headers: Headers,
    pub body: Bytes,
    pub metadata: MirrorMetadata,
}

impl MirroredRequest {
    pub fn url(&self) -> String {
        canonical_url(&self.scheme, &self.host, self.port, &self.path)
    }

    pub fn is_mirrored(&self) -> bool {
        self.metadata.mirrored
    }

    /// Value of the provenance header, if present
    pub fn mirrored_from(&self) -> Option<&str> {
        self.headers.get(X_MIRRORED_FROM)
    }
}

// ========== Decisions ==========

/// Why a request was not mirrored
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The request is itself a replay
    Replay,
    /// No mirror base URL configured
    Disabled,
    /// The request URL does not match the configured pattern
    NoMatch,
    /// The configured pattern failed to compile
    InvalidPattern,
    /// The configured base URL lacks a scheme or host
    InvalidBaseUrl(String),
    /// The request already targets the mirror
    AlreadyMirrorBound,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replay => write!(f, "request is a replay"),
            Self::Disabled => write!(f, "mirroring disabled"),
            Self::NoMatch => write!(f, "url does not match pattern"),
            Self::InvalidPattern => write!(f, "match pattern is invalid"),
            Self::InvalidBaseUrl(base) => write!(f, "mirror base is invalid: {base}"),
            Self::AlreadyMirrorBound => write!(f, "request already targets the mirror"),
        }
    }
}

/// Errors raised while interpreting mirror configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error("mirror_base is invalid: {0}")]
    InvalidBaseUrl(String),

    #[error("mirror_match is invalid: {0}")]
    InvalidPattern(String),

    #[error("Invalid request URL: {0}")]
    InvalidRequestUrl(String),
}
