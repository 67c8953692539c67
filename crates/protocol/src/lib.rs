pub mod constants;
pub mod discovery;
pub mod messages;
pub mod topology;
pub mod types;

// Re-export primary types for convenience.
pub use discovery::DiscoverResponse;
pub use messages::HelloMessage;
pub use topology::{Core, DiscoveryTopology, Endpoint, Group, TopologyError};
pub use types::DeliveryGuarantee;
