//! Opening one session against one endpoint.

use std::future::Future;
use std::io;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
};
use tracing::debug;

use edgelink_protocol::constants::REQUEST_QUEUE_CAPACITY;

use crate::messaging::MessagingSession;
use crate::session::SessionConfig;

/// Why a single connection attempt failed. Never fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionAttemptError {
    #[error("no session within {0:?}")]
    Timeout(Duration),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("group {0} has no trusted authority")]
    MissingTrustAnchor(String),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

/// Opens a session for a [`SessionConfig`].
///
/// An attempt resolves exactly once: with a handle when the session is up,
/// or with the reason it could not be established.
pub trait Connector: Send + Sync {
    type Handle: Send;

    fn attempt(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<Self::Handle, ConnectionAttemptError>> + Send;
}

/// Connects to hubs over MQTT with mutual TLS.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    queue_capacity: usize,
    #[cfg(test)]
    plaintext: bool,
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self {
            queue_capacity: REQUEST_QUEUE_CAPACITY,
            #[cfg(test)]
            plaintext: false,
        }
    }
}

impl MqttConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many outbound requests may queue per session.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Talks plain TCP to a local test broker.
    #[cfg(test)]
    fn plaintext(mut self) -> Self {
        self.plaintext = true;
        self
    }

    fn options_for(&self, config: &SessionConfig) -> MqttOptions {
        #[allow(unused_mut)]
        let mut options = config.mqtt_options();
        #[cfg(test)]
        if self.plaintext {
            options.set_transport(rumqttc::Transport::Tcp);
        }
        options
    }
}

impl Connector for MqttConnector {
    type Handle = MessagingSession;

    async fn attempt(&self, config: &SessionConfig) -> Result<MessagingSession, ConnectionAttemptError> {
        let (client, mut eventloop) = AsyncClient::new(self.options_for(config), self.queue_capacity);

        debug!(
            endpoint = %config.endpoint,
            client_id = %config.client_id,
            "connecting to hub"
        );

        match tokio::time::timeout(config.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => Ok(MessagingSession::spawn(client, eventloop)),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(ConnectionAttemptError::Timeout(config.connect_timeout)),
        }
    }
}

/// Drives the event loop until the broker accepts or rejects the session.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            if ack.code == ConnectReturnCode::Success {
                return Ok(());
            }
            return Err(ConnectionError::ConnectionRefused(ack.code));
        }
    }
}

fn classify(err: ConnectionError) -> ConnectionAttemptError {
    match err {
        ConnectionError::ConnectionRefused(code) => {
            ConnectionAttemptError::Refused(format!("broker returned {code:?}"))
        }
        ConnectionError::Io(e) => match e.kind() {
            io::ErrorKind::ConnectionRefused => ConnectionAttemptError::Refused(e.to_string()),
            _ => ConnectionAttemptError::Handshake(e.to_string()),
        },
        ConnectionError::Tls(e) => ConnectionAttemptError::Handshake(e.to_string()),
        other => ConnectionAttemptError::Handshake(other.to_string()),
    }
}
