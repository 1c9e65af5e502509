//! Traffic mirroring pipeline
//!
//! Each intercepted request passes through four stages:
//! - Options: the current mirror base URL and match pattern
//! - Filter: decides eligibility and validates the mirror target
//! - Transform: builds an independent, scrubbed, retargeted copy
//! - Dispatch: hands the copy to a replay mechanism without waiting
//!
//! [`MirrorPipeline::on_request`] runs them in order and contains every
//! failure so the original request is never affected.

pub mod dispatch;
pub mod filter;
pub mod options;
pub mod pipeline;
pub mod replay;
pub mod transform;
pub mod types;

pub use dispatch::{dispatch, DispatchError, ReplaySink};
pub use filter::should_mirror;
pub use options::{MirrorOptions, MirrorOptionsUpdate, MirrorOptionsView, MirrorSnapshot};
pub use pipeline::{MirrorOutcome, MirrorPipeline};
pub use replay::{QueuedReplayClient, ReplayWorker, DEFAULT_REPLAY_TIMEOUT};
pub use transform::build_mirrored;
pub use types::{
    Headers, MirrorError, MirrorTarget, MirroredRequest, ObservedRequest, ReplayOrigin,
    SkipReason,
};
