//! Runtime-mutable mirror options
//!
//! Writers publish a fresh immutable [`MirrorSnapshot`]; each pipeline
//! invocation reads one snapshot up front and uses it throughout, so a
//! concurrent write never splits a single decision across two configurations.

use crate::mirror::types::{MirrorError, MirrorTarget, MATCH_EVERYTHING};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Compiled form of `mirror_match`
#[derive(Clone, Debug)]
pub enum MatchPattern {
    Valid(Regex),
    /// Compilation failed; every URL is treated as non-matching
    Invalid(MirrorError),
}

impl MatchPattern {
    /// Compile a pattern; an empty pattern means match everything
    pub fn compile(pattern: &str) -> Self {
        let effective = if pattern.is_empty() {
            MATCH_EVERYTHING
        } else {
            pattern
        };

        match Regex::new(effective) {
            Ok(regex) => Self::Valid(regex),
            Err(e) => Self::Invalid(MirrorError::InvalidPattern(format!("{pattern}: {e}"))),
        }
    }

    /// Unanchored search against `url`
    pub fn is_match(&self, url: &str) -> bool {
        match self {
            Self::Valid(regex) => regex.is_match(url),
            Self::Invalid(_) => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// One consistent view of the mirror options
#[derive(Clone, Debug)]
pub struct MirrorSnapshot {
    base_url: String,
    match_source: String,
    pattern: MatchPattern,
}

impl MirrorSnapshot {
    pub fn new(base_url: impl Into<String>, match_source: impl Into<String>) -> Self {
        let match_source = match_source.into();
        let pattern = MatchPattern::compile(&match_source);
        Self {
            base_url: base_url.into(),
            match_source,
            pattern,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Pattern text exactly as configured
    pub fn match_source(&self) -> &str {
        &self.match_source
    }

    pub fn pattern(&self) -> &MatchPattern {
        &self.pattern
    }

    pub fn is_enabled(&self) -> bool {
        !self.base_url.is_empty()
    }
}

impl Default for MirrorSnapshot {
    fn default() -> Self {
        Self::new(String::new(), MATCH_EVERYTHING)
    }
}

/// Serializable view of the options, as exposed to the configuration surface
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorOptionsView {
    pub mirror_base: String,
    pub mirror_match: String,
    pub mirror_match_valid: bool,
}

/// Partial update from the configuration surface
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorOptionsUpdate {
    #[serde(default)]
    pub mirror_base: Option<String>,
    #[serde(default)]
    pub mirror_match: Option<String>,
}

/// Shared handle to the process-wide mirror options
#[derive(Clone, Debug, Default)]
pub struct MirrorOptions {
    current: Arc<RwLock<Arc<MirrorSnapshot>>>,
}

impl MirrorOptions {
    pub fn new(base_url: impl Into<String>, match_source: impl Into<String>) -> Self {
        let snapshot = MirrorSnapshot::new(base_url, match_source);
        warn_if_invalid_base(snapshot.base_url());
        warn_if_invalid_pattern(&snapshot);
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// The options current at the time of the call
    pub fn snapshot(&self) -> Arc<MirrorSnapshot> {
        self.current.read().clone()
    }

    pub fn set_mirror_base(&self, base_url: impl Into<String>) {
        let base_url = base_url.into();
        let mut guard = self.current.write();
        let next = MirrorSnapshot {
            base_url: base_url.clone(),
            match_source: guard.match_source.clone(),
            pattern: guard.pattern.clone(),
        };
        *guard = Arc::new(next);
        drop(guard);

        info!(mirror_base = %base_url, "mirror_base updated");
        warn_if_invalid_base(&base_url);
    }

    /// Replace the match pattern; an invalid pattern is accepted but never matches
    pub fn set_mirror_match(&self, match_source: impl Into<String>) {
        let match_source = match_source.into();
        let mut guard = self.current.write();
        let next = MirrorSnapshot::new(guard.base_url.clone(), match_source.clone());
        warn_if_invalid_pattern(&next);
        *guard = Arc::new(next);
        drop(guard);

        info!(mirror_match = %match_source, "mirror_match updated");
    }

    pub fn apply(&self, update: MirrorOptionsUpdate) {
        if let Some(base) = update.mirror_base {
            self.set_mirror_base(base);
        }
        if let Some(pattern) = update.mirror_match {
            self.set_mirror_match(pattern);
        }
    }

    pub fn view(&self) -> MirrorOptionsView {
        let snapshot = self.snapshot();
        MirrorOptionsView {
            mirror_base: snapshot.base_url().to_string(),
            mirror_match: snapshot.match_source().to_string(),
            mirror_match_valid: snapshot.pattern().is_valid(),
        }
    }
}

/// An empty base is valid: it disables mirroring
fn warn_if_invalid_base(base_url: &str) {
    if base_url.is_empty() {
        return;
    }
    if let Err(e) = MirrorTarget::parse(base_url) {
        warn!("{e}; matching requests will be skipped until it is fixed");
    }
}

fn warn_if_invalid_pattern(snapshot: &MirrorSnapshot) {
    if let MatchPattern::Invalid(e) = snapshot.pattern() {
        warn!("{e}; no requests will be mirrored until it is fixed");
    }
}
