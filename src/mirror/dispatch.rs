//! Fire-and-forget dispatch of mirrored requests

use crate::mirror::types::MirroredRequest;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported by a replay mechanism
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Mirror queue is full; request to {url} dropped")]
    QueueFull { url: String },

    #[error("Mirror queue is closed")]
    QueueClosed,

    #[error("Failed to build mirrored request: {0}")]
    InvalidRequest(String),

    #[error("Mirror transport error: {0}")]
    Transport(String),
}

/// Capability to send a mirrored request asynchronously
///
/// `submit` must return as soon as the request has been handed off; it must
/// never wait for the network round trip.
pub trait ReplaySink: Send + Sync {
    fn submit(&self, request: MirroredRequest) -> Result<(), DispatchError>;
}

impl<T: ReplaySink + ?Sized> ReplaySink for Arc<T> {
    fn submit(&self, request: MirroredRequest) -> Result<(), DispatchError> {
        (**self).submit(request)
    }
}

/// Hand `request` to `sink`, logging any handoff failure instead of returning it
pub fn dispatch(sink: &dyn ReplaySink, request: MirroredRequest) {
    let url = request.url();
    match sink.submit(request) {
        Ok(()) => debug!(%url, "mirrored request dispatched"),
        Err(e) => warn!(%url, "mirror dispatch failed: {e}"),
    }
}
