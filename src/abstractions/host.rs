//! Host payloads, sizing and related provider-side value types.

use serde::{Deserialize, Serialize};

use super::Identifiable;

/// Intrinsic fields of a host, as persisted in metadata.
///
/// Networking details live in the host's `network.v1` property, not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostCore {
    /// Provider-assigned host id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// User-facing host name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// PEM private key installed for the orchestration user.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    /// SSH port the host listens on.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl HostCore {
    /// A blank host with the default SSH port.
    pub fn new() -> Self {
        Self {
            ssh_port: default_ssh_port(),
            ..Self::default()
        }
    }
}

impl Identifiable for HostCore {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sizing requirements used to select a host template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizingRequirements {
    /// Minimum number of CPU cores.
    pub min_cores: u32,
    /// Maximum number of CPU cores; 0 means unbounded.
    pub max_cores: u32,
    /// Minimum RAM in gigabytes.
    pub min_ram_gb: f32,
    /// Maximum RAM in gigabytes; 0 means unbounded.
    pub max_ram_gb: f32,
    /// Minimum disk size in gigabytes.
    pub min_disk_gb: u32,
    /// Minimum number of GPUs; 0 means no GPU required.
    pub min_gpu: u32,
    /// Minimum CPU frequency in GHz; 0 means no requirement.
    pub min_cpu_freq: f32,
    /// Image to use when the request does not name one.
    pub image: String,
}

/// A provider host template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostTemplate {
    /// Provider-assigned template id.
    pub id: String,
    /// Template name.
    pub name: String,
    /// Number of CPU cores.
    pub cores: u32,
    /// CPU frequency in GHz; 0 when the provider does not publish it.
    pub cpu_freq: f32,
    /// Number of GPUs.
    pub gpu_count: u32,
    /// GPU model, when any.
    pub gpu_type: String,
    /// RAM in gigabytes.
    pub ram_gb: f32,
    /// Disk in gigabytes.
    pub disk_gb: u32,
}

/// A provider OS image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    /// Provider-assigned image id.
    pub id: String,
    /// Image name.
    pub name: String,
}

/// An SSH key pair registered with the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Provider-assigned key pair id.
    pub id: String,
    /// Key pair name.
    pub name: String,
    /// Public half, as installed on hosts.
    pub public_key: String,
    /// Private half, kept in metadata only.
    pub private_key: String,
}

/// Connection details for reaching a host over SSH.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SshConfig {
    /// Address to connect to.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// PEM private key authenticating the user.
    pub private_key: String,
}

/// Requirements for creating a host.
#[derive(Debug, Clone, Default)]
pub struct HostRequest {
    /// Resource name registered with the provider.
    pub resource_name: String,
    /// Host FQDN, when a DNS domain applies.
    pub host_name: String,
    /// Ids of the networks the host attaches to; the first one is the
    /// default network.
    pub network_ids: Vec<String>,
    /// Key pair installed on the host.
    pub key_pair: KeyPair,
    /// Provider template id.
    pub template_id: String,
    /// Provider image id.
    pub image_id: String,
    /// Whether the host routes traffic for its default network.
    pub is_gateway: bool,
    /// Whether the host receives a public address.
    pub public_ip: bool,
    /// Keep the host on creation failure for forensics.
    pub keep_on_failure: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_port_defaults_on_read() {
        let host: HostCore = serde_json::from_str(r#"{"id":"h-1","name":"gw"}"#).unwrap();
        assert_eq!(host.ssh_port, 22);
    }
}
