//! EdgeLink edge device.
//!
//! Loads the device credentials, discovers the hub cores it may reach,
//! connects to every advertised endpoint and runs a hello round trip over
//! each established session.

pub mod config;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use edgelink_credentials::{CredentialBundle, CredentialError, CredentialPaths};
use edgelink_discovery::{ClientConfig, DiscoveryError, TopologySource};
use edgelink_hub_connection::{
    ConnectionOrchestrator, ConnectionRecord, Connector, MessagingError, MessagingSession,
    MqttRequests,
};
use edgelink_protocol::{DeliveryGuarantee, HelloMessage};

pub use config::{ConfigError, DeviceConfig};

/// Errors that abort the discover-and-connect flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("credentials unavailable: {0}")]
    Credentials(#[from] CredentialError),

    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("no hub connection established ({attempted} endpoints attempted)")]
    NoConnections { attempted: usize },

    #[error("health check failed: {0}")]
    HealthCheck(#[from] MessagingError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,edgelink=debug")),
        )
        .init();
}

/// Builds the HTTPS discovery client for `config`.
pub fn discovery_client(
    config: &DeviceConfig,
    credentials: &CredentialBundle,
) -> Result<edgelink_discovery::Client, DiscoveryError> {
    let client_config = ClientConfig {
        region: config.region.clone(),
        endpoint: config.discovery_endpoint.clone(),
    };
    edgelink_discovery::Client::new(client_config, credentials)
}

/// Runs discovery and connects to every endpoint found.
///
/// Credentials are loaded before anything touches the network; a missing
/// file aborts the flow without building the discovery client. Finding no
/// reachable hub is an error here, unlike in the orchestrator.
pub async fn connect_device<S, F, C>(
    config: &DeviceConfig,
    paths: &CredentialPaths,
    make_discovery: F,
    orchestrator: &ConnectionOrchestrator<C>,
) -> Result<Vec<ConnectionRecord<C::Handle>>, FlowError>
where
    S: TopologySource,
    F: FnOnce(&DeviceConfig, &CredentialBundle) -> Result<S, DiscoveryError>,
    C: Connector,
{
    let credentials = Arc::new(edgelink_credentials::load(paths)?);
    info!(certs_dir = %config.certs_dir.display(), "credentials loaded");

    let discovery = make_discovery(config, &credentials)?;
    let topology = discovery.discover(&config.device_name).await?;

    if !config.hub_id.is_empty() && !topology.contains_core(&config.hub_id) {
        warn!(hub_id = %config.hub_id, "associated hub not present in discovered topology");
    }

    let report = if config.max_parallel_attempts > 1 {
        orchestrator
            .connect_all_concurrent_with_report(
                &topology,
                credentials,
                &config.device_name,
                config.max_parallel_attempts,
            )
            .await
    } else {
        orchestrator
            .connect_all_with_report(&topology, credentials, &config.device_name)
            .await
    };

    if report.records.is_empty() {
        return Err(FlowError::NoConnections {
            attempted: report.attempted,
        });
    }
    Ok(report.into_records())
}

/// Subscribes to `response_topic`, then publishes a hello on `request_topic`.
pub async fn start_health_check<R: MqttRequests>(
    session: &MessagingSession<R>,
    request_topic: &str,
    response_topic: &str,
) -> Result<(), FlowError> {
    session
        .subscribe(
            response_topic,
            DeliveryGuarantee::AtLeastOnce,
            Box::new(|topic: &str, payload: &[u8]| match HelloMessage::from_bytes(payload) {
                Ok(msg) => info!(topic, message = %msg.message, "hub replied"),
                Err(_) => info!(topic, bytes = payload.len(), "message received"),
            }),
        )
        .await?;

    let hello = HelloMessage::hello().to_bytes()?;
    let result = session
        .publish(request_topic, &hello, DeliveryGuarantee::AtLeastOnce)
        .await?;
    info!(
        topic = request_topic,
        packet_id = ?result.packet_id,
        "hello published"
    );
    Ok(())
}
