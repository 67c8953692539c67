//! Hub topology reachable from a device.
//!
//! A snapshot produced by one discovery call. Nothing here is mutated after
//! construction; consumers iterate it in discovery order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Violations of the topology invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    #[error("endpoint {host} on core {core} has invalid port {port}")]
    InvalidPort {
        core: String,
        host: String,
        port: i64,
    },

    #[error("group {group} lists no trusted authority")]
    NoTrustedAuthority { group: String },

    #[error("core in group {group} has an empty identifier")]
    EmptyCoreId { group: String },
}

/// All groups of hubs the device may connect to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryTopology {
    pub groups: Vec<Group>,
}

/// A cluster of hubs sharing one set of trust anchors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    /// PEM-encoded certificate authorities, in registry order.
    pub trusted_authorities: Vec<Vec<u8>>,
    pub cores: Vec<Core>,
}

/// A hub and the addresses it advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Core {
    pub identifier: String,
    pub endpoints: Vec<Endpoint>,
}

/// One reachable address of a hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub host_address: String,
    pub port: u16,
    /// Opaque registry metadata, passed through untouched.
    #[serde(default)]
    pub metadata: String,
}

impl Endpoint {
    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host_address, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_address, self.port)
    }
}

impl Group {
    /// The trust anchor used for every session in this group.
    pub fn trust_anchor(&self) -> Option<&[u8]> {
        self.trusted_authorities.first().map(Vec::as_slice)
    }
}

impl Core {
    /// The thing name, i.e. the last path segment of an ARN identifier.
    pub fn thing_name(&self) -> &str {
        self.identifier
            .rsplit_once('/')
            .map_or(self.identifier.as_str(), |(_, name)| name)
    }
}

impl DiscoveryTopology {
    /// Returns true if no group was discovered.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of cores across all groups.
    pub fn core_count(&self) -> usize {
        self.groups.iter().map(|g| g.cores.len()).sum()
    }

    /// Number of endpoints across all groups and cores.
    pub fn endpoint_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| &g.cores)
            .map(|c| c.endpoints.len())
            .sum()
    }

    /// Returns true if a core matches `id`, either by full identifier or by
    /// thing name.
    pub fn contains_core(&self, id: &str) -> bool {
        self.groups
            .iter()
            .flat_map(|g| &g.cores)
            .any(|c| c.identifier == id || c.thing_name() == id)
    }

    /// Checks the invariants a freshly discovered topology must hold.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for group in &self.groups {
            if group.trusted_authorities.is_empty() {
                return Err(TopologyError::NoTrustedAuthority {
                    group: group.id.clone(),
                });
            }
            for core in &group.cores {
                if core.identifier.is_empty() {
                    return Err(TopologyError::EmptyCoreId {
                        group: group.id.clone(),
                    });
                }
                for endpoint in &core.endpoints {
                    if endpoint.port == 0 {
                        return Err(TopologyError::InvalidPort {
                            core: core.identifier.clone(),
                            host: endpoint.host_address.clone(),
                            port: 0,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
