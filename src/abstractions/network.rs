//! Network payloads and requests.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::fail::Failure;

use super::{HostCore, Identifiable};

/// IP protocol version of a network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpVersion {
    /// IPv4.
    #[default]
    V4,
    /// IPv6.
    V6,
}

/// Lifecycle state of a network, persisted in its metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    /// State not yet recorded.
    #[default]
    Unknown,
    /// Gateway hosts are being provisioned.
    GatewayCreation,
    /// Gateways exist; final configuration phases are running.
    GatewayConfiguration,
    /// The network is fully usable.
    Ready,
    /// A previous operation left the network unusable.
    Error,
}

/// Requirements for creating a network.
#[derive(Debug, Clone, Default)]
pub struct NetworkRequest {
    /// Name of the network; also the metadata `byName` key.
    pub name: String,
    /// Address block in CIDR notation; must be non-routable when set.
    pub cidr: String,
    /// IP protocol version.
    pub ip_version: IpVersion,
    /// DNS suffix used for host FQDNs on this network.
    pub domain: String,
    /// DNS servers pushed to hosts on this network.
    pub dns_servers: Vec<String>,
    /// Provision two gateways and a virtual IP for failover.
    pub ha: bool,
    /// Image requested for the gateway host(s).
    pub image: String,
    /// Keep partially-created resources on failure for forensics.
    pub keep_on_failure: bool,
}

/// A nested address block carved out of a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubNetwork {
    /// Address block of the subnetwork.
    #[serde(rename = "subnetmask", default, skip_serializing_if = "String::is_empty")]
    pub cidr: String,
    /// Provider id of the subnetwork.
    #[serde(rename = "subnetid", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// A provider-managed virtual IP floating between gateway hosts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualIp {
    /// Provider id of the virtual IP.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Name of the virtual IP.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Network the virtual IP lives on.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_id: String,
    /// Private address, used as default route by hosts of the network.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_ip: String,
    /// Public address, used as the network endpoint.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_ip: String,
    /// Hosts currently bound to the virtual IP.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostCore>,
}

/// A virtual network, as persisted in metadata.
///
/// Gateways are referenced by id only; the gateway hosts are loaded on
/// demand, so there is no cyclic object graph at rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Provider-assigned network id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// User-facing network name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Address block in CIDR notation.
    #[serde(rename = "mask", default, skip_serializing_if = "String::is_empty")]
    pub cidr: String,
    /// DNS suffix used to build host FQDNs.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    /// DNS servers pushed to hosts of this network.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
    /// Id of the host acting as primary gateway.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_id: String,
    /// Id of the host acting as secondary gateway, when HA is set up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secondary_gateway_id: String,
    /// Virtual IP of the network, when created with HA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip: Option<VirtualIp>,
    /// IP protocol version.
    #[serde(default)]
    pub ip_version: IpVersion,
    /// Lifecycle state.
    #[serde(rename = "status", default)]
    pub network_state: NetworkState,
    /// Address blocks carved out of this network.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnetworks: Vec<SubNetwork>,
}

impl Network {
    /// A blank network in the `Unknown` state.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Identifiable for Network {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Decide whether `cidr` is routable on the public internet.
///
/// RFC1918 blocks, link-local and loopback ranges, and IPv6 unique-local
/// addresses count as non-routable; networks are only ever created on
/// non-routable blocks.
pub fn cidr_is_routable(cidr: &str) -> Result<bool, Failure> {
    let network: IpNetwork = cidr
        .parse()
        .map_err(|err| Failure::invalid_request(format!("invalid CIDR '{cidr}': {err}")))?;
    let routable = match network {
        IpNetwork::V4(block) => {
            let base = block.network();
            !(base.is_private() || base.is_link_local() || base.is_loopback())
        }
        IpNetwork::V6(block) => {
            let base = block.network();
            let head = base.segments()[0];
            let unique_local = (head & 0xfe00) == 0xfc00;
            let link_local = (head & 0xffc0) == 0xfe80;
            !(unique_local || link_local || base.is_loopback())
        }
    };
    Ok(routable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1918_blocks_are_not_routable() {
        for cidr in ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/24"] {
            assert!(!cidr_is_routable(cidr).unwrap(), "{cidr}");
        }
    }

    #[test]
    fn public_blocks_are_routable() {
        for cidr in ["8.8.8.0/24", "203.0.113.0/24", "2001:db8::/32"] {
            assert!(cidr_is_routable(cidr).unwrap(), "{cidr}");
        }
    }

    #[test]
    fn link_local_and_unique_local_are_not_routable() {
        assert!(!cidr_is_routable("169.254.0.0/16").unwrap());
        assert!(!cidr_is_routable("fd00::/8").unwrap());
        assert!(!cidr_is_routable("fe80::/10").unwrap());
    }

    #[test]
    fn garbage_cidr_is_an_invalid_request() {
        let failure = cidr_is_routable("not-a-cidr").unwrap_err();
        assert!(failure.is(crate::fail::FailureKind::InvalidRequest));
    }

    #[test]
    fn serialisation_uses_stable_field_names() {
        let network = Network {
            id: "n-1".into(),
            name: "alpha".into(),
            cidr: "192.168.0.0/24".into(),
            gateway_id: "h-1".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&network).unwrap();
        assert_eq!(json["mask"], "192.168.0.0/24");
        assert_eq!(json["gateway_id"], "h-1");
        assert_eq!(json["status"], "unknown");
        assert!(json.get("vip").is_none());
    }

    #[test]
    fn unknown_fields_are_ignored_on_read() {
        let raw = r#"{"id":"n-1","name":"alpha","mask":"10.0.0.0/16","not_a_field":true}"#;
        let network: Network = serde_json::from_str(raw).unwrap();
        assert_eq!(network.cidr, "10.0.0.0/16");
        assert_eq!(network.network_state, NetworkState::Unknown);
    }
}
