use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;
use traffic_mirror::config::{LoggingSettings, Settings};
use traffic_mirror::Application;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    init_tracing(&settings.logging);

    info!("Starting traffic mirror application");

    let app = Application::from_settings(settings);
    app.run().await?;

    Ok(())
}

fn init_tracing(logging: &LoggingSettings) {
    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
