//! Eligibility filter: decides whether an observed request gets mirrored

use crate::mirror::options::{MatchPattern, MirrorSnapshot};
use crate::mirror::types::{MirrorTarget, ObservedRequest, ReplayOrigin, SkipReason};
use tracing::warn;

/// Decide whether `req` should be mirrored under `options`
///
/// Checks run in a fixed order and stop at the first failure: replay,
/// disabled, pattern, base URL, then loop prevention. The only side effect
/// is a warning when the configured base URL is unusable.
pub fn should_mirror(
    req: &ObservedRequest,
    options: &MirrorSnapshot,
) -> Result<MirrorTarget, SkipReason> {
    if req.is_replay == ReplayOrigin::Request {
        return Err(SkipReason::Replay);
    }

    if !options.is_enabled() {
        return Err(SkipReason::Disabled);
    }

    match options.pattern() {
        MatchPattern::Invalid(_) => return Err(SkipReason::InvalidPattern),
        pattern if !pattern.is_match(&req.canonical_url()) => return Err(SkipReason::NoMatch),
        _ => {}
    }

    let target = MirrorTarget::parse(options.base_url()).map_err(|e| {
        warn!("{e}");
        SkipReason::InvalidBaseUrl(options.base_url().to_string())
    })?;

    if target.addresses(&req.host, req.port) {
        return Err(SkipReason::AlreadyMirrorBound);
    }

    Ok(target)
}
