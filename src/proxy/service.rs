//! Proxy host service
//!
//! The `MirrorProxyService` accepts proxied requests, runs the mirror
//! pipeline on each one, and forwards the original upstream unchanged.
//!
//! ```rust,ignore
//! use traffic_mirror::mirror::{
//!     MirrorOptions, MirrorPipeline, QueuedReplayClient, DEFAULT_REPLAY_TIMEOUT,
//! };
//! use traffic_mirror::proxy::{MirrorProxyService, ProxyConfig};
//!
//! let options = MirrorOptions::new("http://mirror.internal:9000", ".*api.*");
//! let (replay, _shutdown) = QueuedReplayClient::spawn(Default::default(), DEFAULT_REPLAY_TIMEOUT);
//! let pipeline = MirrorPipeline::new(options, std::sync::Arc::new(replay));
//!
//! let router = MirrorProxyService::new(ProxyConfig::default(), pipeline).into_router();
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use crate::mirror::{MirrorOptionsUpdate, MirrorOptionsView, MirrorPipeline};
use crate::proxy::error_response::extract_request_id;
use crate::proxy::forward::{observe, resolve_destination, ForwardingService};
use crate::proxy::headers::paths;
use crate::proxy::types::*;
use axum::{
    extract::{Request, State},
    response::{IntoResponse, Response},
    routing::get,
    Json,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Proxy host combining the forwarding path and the mirror pipeline
pub struct MirrorProxyService {
    forwarding: ForwardingService,
    pipeline: MirrorPipeline,
}

impl MirrorProxyService {
    pub fn new(config: ProxyConfig, pipeline: MirrorPipeline) -> Self {
        Self {
            forwarding: ForwardingService::new(config),
            pipeline,
        }
    }

    /// Create an Axum router for the service
    pub fn into_router(self) -> axum::Router {
        axum::Router::new()
            .route(paths::HEALTH, get(health_handler))
            .route(
                paths::MIRROR_OPTIONS,
                get(get_options_handler).put(put_options_handler),
            )
            .fallback(proxy_handler)
            .with_state(Arc::new(self))
            .layer(TraceLayer::new_for_http())
    }

    async fn handle(&self, request: Request) -> ProxyResult<Response> {
        let (parts, body) = request.into_parts();
        let destination = resolve_destination(&parts)?;
        let body = self.forwarding.collect_body(body).await?;

        match observe(&parts, &destination, &body) {
            Ok(observed) => {
                let outcome = self.pipeline.on_request(&observed);
                debug!(?outcome, "mirror pipeline finished");
            }
            Err(e) => debug!("request not observable for mirroring: {e}"),
        }

        self.forwarding.forward(parts, body, destination).await
    }
}

/// Axum handler for proxied requests
async fn proxy_handler(
    State(service): State<Arc<MirrorProxyService>>,
    request: Request,
) -> Response {
    let request_id = extract_request_id(request.headers());

    match service.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            let mut error = e.to_error_response();
            if let Some(id) = request_id {
                error = error.with_request_id(id);
            }
            error.into_response_with_status(e.status_code())
        }
    }
}

async fn get_options_handler(
    State(service): State<Arc<MirrorProxyService>>,
) -> Json<MirrorOptionsView> {
    Json(service.pipeline.options().view())
}

async fn put_options_handler(
    State(service): State<Arc<MirrorProxyService>>,
    Json(update): Json<MirrorOptionsUpdate>,
) -> impl IntoResponse {
    let options = service.pipeline.options();
    options.apply(update);
    Json(options.view())
}

/// Health check handler
async fn health_handler() -> &'static str {
    "OK"
}
