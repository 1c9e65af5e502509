use crate::mirror::types::{QueueCapacity, MATCH_EVERYTHING};
use crate::proxy::types::{ProxyConfig, RequestSizeLimit};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub mirror: MirrorSettings,
    pub upstream: UpstreamSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

/// Initial values for the runtime mirror options
#[derive(Debug, Deserialize, Clone)]
pub struct MirrorSettings {
    /// Base URL to mirror to; empty disables mirroring
    pub base: String,
    /// Regex selecting which request URLs get mirrored
    #[serde(rename = "match")]
    pub match_pattern: String,
    pub queue_capacity: QueueCapacity,
    /// Limit on a single mirror send before it is abandoned
    pub replay_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub request_timeout_ms: u64,
    pub max_request_size: RequestSizeLimit,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .set_default("application.host", "0.0.0.0")?
            .set_default("application.port", 8080)?
            .set_default("application.environment", environment.clone())?
            .set_default("mirror.base", "")?
            .set_default("mirror.match", MATCH_EVERYTHING)?
            .set_default("mirror.queue_capacity", 1024)?
            .set_default("mirror.replay_timeout_ms", 10_000)?
            .set_default("upstream.request_timeout_ms", 30_000)?
            .set_default("upstream.max_request_size", 10 * 1024 * 1024)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("TRAFFIC_MIRROR").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    pub fn replay_timeout(&self) -> Duration {
        Duration::from_millis(self.mirror.replay_timeout_ms)
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            max_request_size: self.upstream.max_request_size,
            request_timeout: Duration::from_millis(self.upstream.request_timeout_ms),
        }
    }
}
