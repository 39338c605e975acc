//! Version 1 property payloads.
//!
//! Property schemas never change in place: a `*.v2` payload would be a new
//! type under a new key, coexisting with the `v1` entries written here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::concurrency::Property;

/// Hosts registered on a network, excluding its gateways.
///
/// Stored under the network's `hosts.v1` property. The two maps mirror each
/// other; attach and detach maintain both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkHosts {
    /// Host id to host name.
    #[serde(default)]
    pub by_id: BTreeMap<String, String>,
    /// Host name to host id.
    #[serde(default)]
    pub by_name: BTreeMap<String, String>,
}

impl Property for NetworkHosts {
    const KEY: &'static str = "hosts.v1";
}

impl NetworkHosts {
    /// Number of registered hosts.
    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// True when no host is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Networking view of a host.
///
/// Stored under the host's `network.v1` property. Gateways are referenced by
/// id; there is no object cycle between a network and its gateway hosts at
/// rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostNetworking {
    /// Whether the host routes traffic for its default network.
    #[serde(default)]
    pub is_gateway: bool,
    /// Id of the host's default network.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_network_id: String,
    /// Id of the gateway serving the host's default route.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_gateway_id: String,
    /// Public IPv4 address, when the host has one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_ip_v4: String,
    /// Private IPv4 address per attached network id.
    #[serde(default)]
    pub ip_v4_addresses: BTreeMap<String, String>,
}

impl HostNetworking {
    /// The host's private address on its default network.
    pub fn default_private_ip(&self) -> Option<&str> {
        self.ip_v4_addresses
            .get(&self.default_network_id)
            .map(String::as_str)
    }
}

impl Property for HostNetworking {
    const KEY: &'static str = "network.v1";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_keys_are_versioned() {
        assert_eq!(NetworkHosts::KEY, "hosts.v1");
        assert_eq!(HostNetworking::KEY, "network.v1");
    }

    #[test]
    fn default_private_ip_follows_the_default_network() {
        let mut networking = HostNetworking {
            default_network_id: "n-1".into(),
            ..Default::default()
        };
        networking
            .ip_v4_addresses
            .insert("n-1".into(), "192.168.0.10".into());
        networking
            .ip_v4_addresses
            .insert("n-2".into(), "10.0.0.10".into());
        assert_eq!(networking.default_private_ip(), Some("192.168.0.10"));
    }
}
