//! Bootstrap payload injected into hosts at creation time.
//!
//! Hosts boot through four phases: `netsec` runs at first boot (driven by
//! the provider's own init machinery), while `hwga`, `sysfix` and `final`
//! are driven afterwards by the orchestration through the
//! [`crate::iaas::PhaseRunner`] contract. The template generator that turns
//! a [`Content`] into actual boot scripts is an external collaborator; this
//! module only defines the payload the orchestration populates.

use serde::{Deserialize, Serialize};

/// A userdata bootstrap phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Network and security hardening; runs at first boot.
    NetSec,
    /// Hardware and guest-agent setup.
    HwGa,
    /// System fixes requiring a configured network.
    SysFix,
    /// Final configuration; the host is usable afterwards.
    Final,
}

impl Phase {
    /// Phase name as used in boot script file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::NetSec => "netsec",
            Phase::HwGa => "hwga",
            Phase::SysFix => "sysfix",
            Phase::Final => "final",
        }
    }

    /// The phases the orchestration drives after gateway creation.
    pub fn finalization() -> [Phase; 3] {
        [Phase::HwGa, Phase::SysFix, Phase::Final]
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The values templated into a host's bootstrap scripts.
///
/// The orchestration fills the gateway and routing fields once the gateways
/// of the host's network are known; everything else is set by the provider
/// driver at host creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Name of the host being bootstrapped.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_name: String,
    /// Whether this host is the primary gateway of its network.
    #[serde(default)]
    pub is_primary_gateway: bool,
    /// Address hosts of the network use as default route.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_route_ip: String,
    /// Address the network is reachable at from outside.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint_ip: String,
    /// Private address of the primary gateway.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_gateway_private_ip: String,
    /// Public address of the primary gateway.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_gateway_public_ip: String,
    /// Private address of the secondary gateway, when HA is set up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secondary_gateway_private_ip: String,
    /// Public address of the secondary gateway, when HA is set up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secondary_gateway_public_ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalization_order_is_stable() {
        let names: Vec<_> = Phase::finalization().iter().map(|p| p.as_str()).collect();
        assert_eq!(names, vec!["hwga", "sysfix", "final"]);
    }
}
