//! Image Detector - Main Entry Point

use api::{init_logging, run_server, ServiceConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load()?;
    init_logging(&config)?;

    info!("=== Image Detector v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Model artifact: {}", config.model_path.display());

    // Model load and warmup complete before the listener is bound
    run_server(config).await?;

    Ok(())
}
