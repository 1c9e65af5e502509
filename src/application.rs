//! Application wiring: settings, mirror options, replay worker, and proxy host

use crate::config::Settings;
use crate::mirror::{MirrorOptions, MirrorPipeline, QueuedReplayClient};
use crate::proxy::MirrorProxyService;
use crate::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    options: MirrorOptions,
}

impl Application {
    #[instrument]
    pub async fn new() -> Result<Self> {
        let settings = Settings::new()?;
        Ok(Self::from_settings(settings))
    }

    pub fn from_settings(settings: Settings) -> Self {
        let options = MirrorOptions::new(
            settings.mirror.base.clone(),
            settings.mirror.match_pattern.clone(),
        );
        Self { settings, options }
    }

    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.settings.bind_address()).await?;
        info!(
            "Starting traffic mirror on {}",
            listener.local_addr()?
        );

        let view = self.options.view();
        if view.mirror_base.is_empty() {
            info!("mirror_base is empty; mirroring disabled until configured");
        } else {
            info!(mirror_base = %view.mirror_base, mirror_match = %view.mirror_match, "mirroring enabled");
        }

        let (replay, replay_shutdown) = QueuedReplayClient::spawn(
            self.settings.mirror.queue_capacity,
            self.settings.replay_timeout(),
        );
        let pipeline = MirrorPipeline::new(self.options.clone(), Arc::new(replay));
        let router =
            MirrorProxyService::new(self.settings.proxy_config(), pipeline).into_router();

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // In-flight mirror sends may be abandoned here.
        if replay_shutdown.send(()).await.is_err() {
            warn!("Mirror replay worker already stopped");
        }
        info!("Traffic mirror stopped");

        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Handle for mutating mirror options at runtime
    pub fn options(&self) -> &MirrorOptions {
        &self.options
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
