//! Secure session configuration.
//!
//! A [`SessionConfig`] is built per attempt: the trust anchor and address
//! differ between endpoints, so configurations are never reused.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{MqttOptions, TlsConfiguration, Transport};

use edgelink_credentials::CredentialBundle;
use edgelink_protocol::Endpoint;
use edgelink_protocol::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE, MQTT_ALPN_PROTOCOL};

use crate::connector::ConnectionAttemptError;

/// What the compiled TLS transport can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    pub alpn: bool,
}

impl TransportCapabilities {
    /// Probes the transport this crate was built with.
    pub fn detect() -> Self {
        Self {
            alpn: cfg!(feature = "alpn"),
        }
    }
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// Everything needed to open one mutually authenticated session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    /// PEM trust anchor the hub certificate must chain to.
    pub trust_anchor: Vec<u8>,
    pub client_identity: Arc<CredentialBundle>,
    pub client_id: String,
    pub clean_session: bool,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    /// Application protocols offered during the handshake, if negotiable.
    pub alpn: Option<Vec<String>>,
}

impl SessionConfig {
    /// MQTT client options with a TLS transport for this session.
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.endpoint.host_address.clone(),
            self.endpoint.port,
        );
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);

        let tls = TlsConfiguration::Simple {
            ca: self.trust_anchor.clone(),
            alpn: self
                .alpn
                .as_ref()
                .map(|protos| protos.iter().map(|p| p.as_bytes().to_vec()).collect()),
            client_auth: Some((
                self.client_identity.client_cert().to_vec(),
                self.client_identity.private_key().to_vec(),
            )),
        };
        options.set_transport(Transport::tls_with_config(tls));
        options
    }
}

/// Builds [`SessionConfig`]s with uniform timeouts.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    capabilities: TransportCapabilities,
    connect_timeout: Duration,
    keep_alive: Duration,
    clean_session: bool,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            capabilities: TransportCapabilities::detect(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: false,
        }
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capabilities(mut self, capabilities: TransportCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Assembles the configuration for one attempt. No I/O.
    ///
    /// Fails only when the client id cannot identify a persistent session.
    pub fn build(
        &self,
        endpoint: Endpoint,
        trust_anchor: Vec<u8>,
        credentials: Arc<CredentialBundle>,
        client_id: &str,
    ) -> Result<SessionConfig, ConnectionAttemptError> {
        if client_id.trim().is_empty() || client_id.starts_with(char::is_whitespace) {
            return Err(ConnectionAttemptError::InvalidConfig(format!(
                "client id {client_id:?} is not usable"
            )));
        }
        if self.keep_alive < Duration::from_secs(1) {
            return Err(ConnectionAttemptError::InvalidConfig(
                "keep-alive must be at least one second".into(),
            ));
        }

        let alpn = self
            .capabilities
            .alpn
            .then(|| vec![MQTT_ALPN_PROTOCOL.to_string()]);

        Ok(SessionConfig {
            endpoint,
            trust_anchor,
            client_identity: credentials,
            client_id: client_id.to_string(),
            clean_session: self.clean_session,
            connect_timeout: self.connect_timeout,
            keep_alive: self.keep_alive,
            alpn,
        })
    }
}
