use std::sync::Arc;

use vpress::{CompressionService, ServiceConfig, TracingSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vpress::logging::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env()?;
    let service = CompressionService::new(config, Arc::new(TracingSink))?;
    service.start().await?;

    tracing::info!("vpress initialized successfully");

    tokio::signal::ctrl_c().await?;
    service.shutdown().await;

    Ok(())
}
