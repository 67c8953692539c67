use std::future::Future;

use tracing::{debug, info, warn};

use edgelink_credentials::CredentialBundle;
use edgelink_protocol::constants::DISCOVERY_TIMEOUT;
use edgelink_protocol::{DiscoverResponse, DiscoveryTopology};

use crate::types::ClientConfig;
use crate::{DiscoveryError, TopologySource, is_valid_device_id};

/// Discovers hub cores through the registry's HTTPS endpoint.
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Client {
    /// Creates a client that authenticates with `credentials`.
    ///
    /// The root authority certificate is the only trust root; built-in
    /// roots are disabled.
    pub fn new(config: ClientConfig, credentials: &CredentialBundle) -> Result<Self, DiscoveryError> {
        let root = reqwest::Certificate::from_pem(credentials.root_authority_cert())
            .map_err(|e| DiscoveryError::Tls(format!("invalid root certificate: {e}")))?;
        let identity = reqwest::Identity::from_pem(&credentials.identity_pem())
            .map_err(|e| DiscoveryError::Tls(format!("invalid client identity: {e}")))?;

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(root)
            .identity(identity)
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .map_err(|e| DiscoveryError::Tls(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Uses a preconfigured HTTP client.
    pub fn with_http_client(http: reqwest::Client, config: ClientConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetches the topology reachable from `device_id`.
    pub async fn discover(&self, device_id: &str) -> Result<DiscoveryTopology, DiscoveryError> {
        if !is_valid_device_id(device_id) {
            return Err(DiscoveryError::InvalidDeviceId(device_id.to_string()));
        }

        let url = self.config.url_for(device_id);
        debug!(%url, "requesting discovery");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            warn!(device = %device_id, "device unknown to registry");
            return Err(DiscoveryError::UnknownDevice(device_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;
        let topology = parse_topology(&body)?;

        info!(
            device = %device_id,
            groups = topology.groups.len(),
            cores = topology.core_count(),
            endpoints = topology.endpoint_count(),
            "discovery complete"
        );
        Ok(topology)
    }
}

impl TopologySource for Client {
    fn discover(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<DiscoveryTopology, DiscoveryError>> + Send {
        Client::discover(self, device_id)
    }
}

/// Parses and validates a discovery response body.
pub fn parse_topology(body: &[u8]) -> Result<DiscoveryTopology, DiscoveryError> {
    let resp: DiscoverResponse = serde_json::from_slice(body)
        .map_err(|e| DiscoveryError::InvalidResponse(e.to_string()))?;
    DiscoveryTopology::try_from(resp).map_err(|e| DiscoveryError::InvalidResponse(e.to_string()))
}
