use std::sync::Arc;

use assistant_gateway::config::Settings;
use assistant_gateway::server;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let settings = Settings::from_env()?;
    info!(
        env = %settings.env,
        prefix = %settings.api_prefix,
        default_agent = %settings.default_agent,
        "Starting assistant gateway"
    );

    server::serve(Arc::new(settings)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}
