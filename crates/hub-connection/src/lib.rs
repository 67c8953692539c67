//! Secure hub connections for edge devices.
//!
//! Builds mutually authenticated session configurations, attempts every
//! discovered hub endpoint, and wraps each established connection in a
//! publish/subscribe session.

pub mod connector;
pub mod messaging;
pub mod orchestrator;
pub(crate) mod pumps;
pub mod session;
pub(crate) mod state;
pub mod topic;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod loopback;

pub use connector::{ConnectionAttemptError, Connector, MqttConnector};
pub use messaging::{MessageCallback, MessagingError, MessagingSession, MqttRequests};
pub use orchestrator::{ConnectionCollector, ConnectionOrchestrator};
pub use pumps::event::EventSource;
pub use session::{SessionBuilder, SessionConfig, TransportCapabilities};
pub use types::{AttemptFailure, ConnectReport, ConnectionRecord, PublishResult, SubscribeResult};
