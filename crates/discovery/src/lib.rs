//! Hub discovery for EdgeLink devices.
//!
//! Asks the regional registry which groups of cores the device may reach,
//! authenticating with the device's own certificate.

pub mod client;
pub mod types;

use std::future::Future;

use edgelink_protocol::DiscoveryTopology;

// Re-export primary types.
pub use client::Client;
pub use types::ClientConfig;

/// Errors for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),

    #[error("device {0} is unknown to the registry")]
    UnknownDevice(String),

    #[error("registry returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid discovery response: {0}")]
    InvalidResponse(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Something that can produce the topology reachable from a device.
pub trait TopologySource {
    /// Performs one discovery round trip. No retry.
    fn discover(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<DiscoveryTopology, DiscoveryError>> + Send;
}

/// Returns true if `id` is a valid registry thing name.
pub fn is_valid_device_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-'))
}
