use serde::{Deserialize, Serialize};

use crate::topology::{Core, DiscoveryTopology, Endpoint, Group, TopologyError};

/// Body returned by the regional discovery service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    #[serde(rename = "GGGroups", default)]
    pub groups: Vec<GroupInfo>,
}

/// A group as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    #[serde(rename = "GGGroupId")]
    pub group_id: String,
    #[serde(rename = "Cores", default)]
    pub cores: Vec<CoreInfo>,
    #[serde(rename = "CAs", default)]
    pub cas: Vec<String>,
}

/// A core as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreInfo {
    #[serde(rename = "thingArn")]
    pub thing_arn: String,
    #[serde(rename = "Connectivity", default)]
    pub connectivity: Vec<ConnectivityInfo>,
}

/// One advertised address of a core.
///
/// The port is kept signed so that out-of-range values reach validation
/// instead of failing deserialization with an opaque message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityInfo {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "HostAddress")]
    pub host_address: String,
    #[serde(rename = "PortNumber")]
    pub port_number: i64,
    #[serde(rename = "Metadata", default)]
    pub metadata: String,
}

impl TryFrom<DiscoverResponse> for DiscoveryTopology {
    type Error = TopologyError;

    fn try_from(resp: DiscoverResponse) -> Result<Self, Self::Error> {
        let mut groups = Vec::with_capacity(resp.groups.len());
        for g in resp.groups {
            let mut cores = Vec::with_capacity(g.cores.len());
            for c in g.cores {
                let mut endpoints = Vec::with_capacity(c.connectivity.len());
                for conn in c.connectivity {
                    let port = u16::try_from(conn.port_number)
                        .ok()
                        .filter(|p| *p != 0)
                        .ok_or_else(|| TopologyError::InvalidPort {
                            core: c.thing_arn.clone(),
                            host: conn.host_address.clone(),
                            port: conn.port_number,
                        })?;
                    endpoints.push(Endpoint {
                        id: conn.id,
                        host_address: conn.host_address,
                        port,
                        metadata: conn.metadata,
                    });
                }
                cores.push(Core {
                    identifier: c.thing_arn,
                    endpoints,
                });
            }
            groups.push(Group {
                id: g.group_id,
                trusted_authorities: g.cas.into_iter().map(String::into_bytes).collect(),
                cores,
            });
        }

        let topology = DiscoveryTopology { groups };
        topology.validate()?;
        Ok(topology)
    }
}
