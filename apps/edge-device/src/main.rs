//! EdgeLink edge device entry point.

use anyhow::Context;
use tracing::{info, warn};

use edgelink_credentials::CredentialPaths;
use edgelink_edge_device::{
    DeviceConfig, connect_device, discovery_client, init_tracing, start_health_check,
};
use edgelink_hub_connection::{ConnectionOrchestrator, MqttConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting EdgeLink edge device"
    );

    let config = DeviceConfig::load().context("failed to load configuration")?;
    info!(
        device = %config.device_name,
        region = %config.region,
        "configuration loaded"
    );

    let paths = CredentialPaths::in_dir(&config.certs_dir);
    let orchestrator = ConnectionOrchestrator::new(MqttConnector::new());
    let records = connect_device(&config, &paths, discovery_client, &orchestrator).await?;

    let request_topic = config.request_topic();
    let response_topic = config.response_topic();
    for record in &records {
        if let Err(e) = start_health_check(&record.handle, &request_topic, &response_topic).await {
            warn!(
                core = %record.core_identifier,
                endpoint = %record.endpoint,
                error = %e,
                "health check failed"
            );
        }
    }

    info!(sessions = records.len(), "connected; press Ctrl-C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutting down");
    for record in &records {
        record.handle.close().await;
    }
    Ok(())
}
