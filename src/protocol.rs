//! Service-facing projections.
//!
//! The RPC surface itself lives outside this crate; these are the wire
//! shapes it exchanges. `failover` is computed from the presence of a
//! virtual IP, never stored.

use serde::{Deserialize, Serialize};

use crate::abstractions;

/// Projection of a virtual IP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualIp {
    /// Provider id of the virtual IP.
    pub id: String,
    /// Name of the virtual IP.
    pub name: String,
    /// Network the virtual IP lives on.
    pub network_id: String,
    /// Private address of the virtual IP.
    pub private_ip: String,
    /// Public address of the virtual IP.
    pub public_ip: String,
}

impl From<abstractions::VirtualIp> for VirtualIp {
    fn from(vip: abstractions::VirtualIp) -> Self {
        Self {
            id: vip.id,
            name: vip.name,
            network_id: vip.network_id,
            private_ip: vip.private_ip,
            public_ip: vip.public_ip,
        }
    }
}

/// Projection of a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Provider id of the network.
    pub id: String,
    /// Name of the network.
    pub name: String,
    /// Address block of the network.
    pub cidr: String,
    /// Id of the primary gateway host.
    pub gateway_id: String,
    /// Id of the secondary gateway host; empty without failover.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secondary_gateway_id: String,
    /// Whether the default route fails over between two gateways.
    pub failover: bool,
    /// The virtual IP carrying the failover, when set up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_ip: Option<VirtualIp>,
}
