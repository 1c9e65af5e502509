//! Built-in replay mechanism: a bounded queue drained by a background worker
//!
//! The queue and the number of in-flight sends share one capacity. Once that
//! many sends are outstanding the worker stops draining, the queue fills, and
//! further submissions are rejected as `QueueFull` instead of piling up tasks
//! and sockets behind a slow mirror.

use crate::mirror::dispatch::{DispatchError, ReplaySink};
use crate::mirror::types::{MirroredRequest, QueueCapacity};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

type MirrorClient = Client<HttpConnector, Full<Bytes>>;

/// Default limit on a single mirror send, response body included
pub const DEFAULT_REPLAY_TIMEOUT: Duration = Duration::from_secs(10);

/// [`ReplaySink`] that enqueues requests for a [`ReplayWorker`]
#[derive(Clone, Debug)]
pub struct QueuedReplayClient {
    queue: mpsc::Sender<MirroredRequest>,
}

impl QueuedReplayClient {
    /// Create the client and the receiving end of its queue
    pub fn new(capacity: QueueCapacity) -> (Self, mpsc::Receiver<MirroredRequest>) {
        let (queue, rx) = mpsc::channel(*capacity.as_ref());
        (Self { queue }, rx)
    }

    /// Create the client and run its worker on the current tokio runtime
    pub fn spawn(capacity: QueueCapacity, send_timeout: Duration) -> (Self, mpsc::Sender<()>) {
        let (client, rx) = Self::new(capacity);
        let (worker, shutdown_tx) = ReplayWorker::new(rx, capacity, send_timeout);

        tokio::spawn(async move {
            worker.run().await;
        });

        (client, shutdown_tx)
    }
}

impl ReplaySink for QueuedReplayClient {
    fn submit(&self, request: MirroredRequest) -> Result<(), DispatchError> {
        self.queue.try_send(request).map_err(|e| match e {
            TrySendError::Full(request) => DispatchError::QueueFull { url: request.url() },
            TrySendError::Closed(_) => DispatchError::QueueClosed,
        })
    }
}

/// Drains the mirror queue in arrival order, sending each request on its own task
pub struct ReplayWorker {
    queue: mpsc::Receiver<MirroredRequest>,
    shutdown_rx: mpsc::Receiver<()>,
    in_flight: Arc<Semaphore>,
    send_timeout: Duration,
    client: MirrorClient,
}

impl ReplayWorker {
    /// At most `max_in_flight` sends run at once; each is abandoned after `send_timeout`
    pub fn new(
        queue: mpsc::Receiver<MirroredRequest>,
        max_in_flight: QueueCapacity,
        send_timeout: Duration,
    ) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .http1_preserve_header_case(true)
            .build_http();

        let worker = Self {
            queue,
            shutdown_rx,
            in_flight: Arc::new(Semaphore::new(*max_in_flight.as_ref())),
            send_timeout,
            client,
        };

        (worker, shutdown_tx)
    }

    /// Run until shutdown is signalled or every client handle is dropped
    pub async fn run(mut self) {
        info!("Mirror replay worker started");

        loop {
            // A permit is taken before dequeuing so a stalled mirror leaves
            // requests in the bounded queue rather than in spawned tasks.
            let Some(permit) = self.next_permit().await else {
                break;
            };
            let Some(request) = self.next_request().await else {
                break;
            };
            spawn_send(&self.client, request, self.send_timeout, permit);
        }

        info!("Mirror replay worker stopped");
    }

    async fn next_permit(&mut self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            Some(()) = self.shutdown_rx.recv() => {
                info!("Mirror replay worker shutting down");
                None
            }
            permit = Arc::clone(&self.in_flight).acquire_owned() => permit.ok(),
        }
    }

    async fn next_request(&mut self) -> Option<MirroredRequest> {
        tokio::select! {
            biased;
            Some(()) = self.shutdown_rx.recv() => {
                info!("Mirror replay worker shutting down");
                None
            }
            next = self.queue.recv() => next,
        }
    }
}

fn spawn_send(
    client: &MirrorClient,
    request: MirroredRequest,
    send_timeout: Duration,
    permit: OwnedSemaphorePermit,
) {
    let client = client.clone();
    tokio::spawn(async move {
        let url = request.url();
        match tokio::time::timeout(send_timeout, send_mirrored(&client, &request)).await {
            Ok(Ok(status)) => debug!(%url, %status, "mirror responded"),
            Ok(Err(e)) => warn!(%url, "{e}"),
            Err(_) => warn!(%url, "mirror did not respond within {send_timeout:?}"),
        }
        drop(permit);
    });
}

async fn send_mirrored(
    client: &MirrorClient,
    request: &MirroredRequest,
) -> Result<http::StatusCode, DispatchError> {
    let outgoing = to_http_request(request)?;
    let response = client
        .request(outgoing)
        .await
        .map_err(|e| DispatchError::Transport(e.to_string()))?;

    let status = response.status();
    // The mirror's response body is read only so the connection can be reused.
    let _ = response.into_body().collect().await;
    Ok(status)
}

/// Convert a mirrored request into an `http::Request` ready for the client
pub fn to_http_request(request: &MirroredRequest) -> Result<Request<Full<Bytes>>, DispatchError> {
    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(request.url());

    for (name, value) in request.headers.iter() {
        let name = http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DispatchError::InvalidRequest(format!("header {name}: {e}")))?;
        let value = http::HeaderValue::from_bytes(value)
            .map_err(|e| DispatchError::InvalidRequest(format!("header {name}: {e}")))?;
        builder = builder.header(name, value);
    }

    builder
        .body(Full::new(request.body.clone()))
        .map_err(|e| DispatchError::InvalidRequest(e.to_string()))
}
