//! Health check server binary

use healthcheck_server::{Config, HealthcheckServer, setup_tracing};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing is not initialized yet, so configuration errors go to stderr
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    let _telemetry_guard = setup_tracing(&config.logging, &config.telemetry)?;

    tracing::info!("Health check server starting");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C"),
            Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        signal.cancel();
    });

    HealthcheckServer::new(config).run(shutdown).await?;

    // Telemetry guard will flush spans on drop

    Ok(())
}
