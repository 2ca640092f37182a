use anyhow::Result;
use tracing::{info, warn};

use camvault_core::{
    bootstrap::{init_services, load_config},
    logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (validated inside load_config, fail fast)
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("camvault starting...");

    // 3. Initialize services
    let services = init_services(&config).await?;

    // 4. Register streams with the gateway and enable recording
    for device in services.devices.list().await? {
        if !device.enabled {
            continue;
        }
        if let Err(e) = services.gateway.register(&device).await {
            // The gateway may come up later; streaming is degraded, not fatal
            warn!(device = %device.id, error = %e, "stream registration failed");
        }
        if device.recordable {
            if let Err(e) = services.recording.enable(&device) {
                warn!(device = %device.id, error = %e, "recording not enabled");
            }
        }
    }

    // 5. Background maintenance
    let session_sweeper = services.pool.spawn_sweeper();
    let retention_sweeper = services.retention.clone().spawn();
    info!("camvault running, press Ctrl+C to stop");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    // 7. Graceful shutdown: stop capture first so the last segments
    // finalize, then drain the upload queue so nothing is lost.
    session_sweeper.abort();
    retention_sweeper.abort();
    services.recording.shutdown().await;
    info!("Recording stopped, draining uploads...");
    services.uploads.drain().await;
    for device in services.devices.list().await? {
        services.gateway.unregister(&device).await?;
    }
    info!("Shutdown complete");
    Ok(())
}
