//! Provider driver contract and the service facade over it.
//!
//! A [`ProviderDriver`] is implemented once per cloud, outside this crate;
//! the core only ever talks to the uniform [`Service`] facade, which couples
//! a driver with the object storage holding metadata and the runner driving
//! userdata phases over SSH.

mod service;

pub use service::Service;

use std::time::Duration;

use async_trait::async_trait;

use crate::abstractions::{
    HostCore, HostNetworking, HostRequest, HostTemplate, Image, KeyPair, Network, NetworkRequest,
    SizingRequirements, SshConfig, VirtualIp,
};
use crate::fail::Failure;
use crate::userdata::{Content, Phase};

/// Capabilities a provider advertises.
///
/// The orchestration degrades gracefully around missing capabilities rather
/// than exposing them verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    /// The provider can create virtual IPs on private networks.
    pub private_virtual_ip: bool,
    /// The provider can create virtual IPs with public addresses.
    pub public_virtual_ip: bool,
}

/// Provider-scoped configuration the core reads.
#[derive(Debug, Clone)]
pub struct ConfigurationOptions {
    /// Image used for gateways when neither the request nor the sizing
    /// names one.
    pub default_image: String,
    /// Budget for long-running provider operations (deletion polls).
    pub operation_timeout: Duration,
}

impl Default for ConfigurationOptions {
    fn default() -> Self {
        Self {
            default_image: String::new(),
            operation_timeout: Duration::from_secs(120),
        }
    }
}

/// Everything the provider returns for a freshly created host.
#[derive(Debug, Clone, Default)]
pub struct CreatedHost {
    /// Intrinsic host fields.
    pub core: HostCore,
    /// Networking view of the host.
    pub networking: HostNetworking,
    /// Bootstrap payload the provider injected at creation.
    pub userdata: Content,
}

/// The per-cloud driver contract.
///
/// Implementations translate these calls into provider API requests; the
/// core composes them into safe multi-step orchestrations. All calls are
/// blocking I/O from the orchestration's point of view and are never
/// cancelled mid-flight.
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    /// Create an L3 network.
    async fn create_network(&self, request: &NetworkRequest) -> Result<Network, Failure>;
    /// Delete the network with the given provider id.
    async fn delete_network(&self, id: &str) -> Result<(), Failure>;
    /// Fetch a network by provider id.
    async fn get_network(&self, id: &str) -> Result<Network, Failure>;
    /// Fetch a network by name.
    async fn get_network_by_name(&self, name: &str) -> Result<Network, Failure>;

    /// Create a virtual IP on a network.
    async fn create_vip(&self, network_id: &str, name: &str) -> Result<VirtualIp, Failure>;
    /// Delete a virtual IP.
    async fn delete_vip(&self, vip: &VirtualIp) -> Result<(), Failure>;
    /// Unbind a host from a virtual IP.
    async fn unbind_host_from_vip(&self, vip: &VirtualIp, host_id: &str) -> Result<(), Failure>;

    /// Templates matching the sizing, cheapest first. With `exact` unset the
    /// provider may widen the match.
    async fn select_templates_by_size(
        &self,
        sizing: &SizingRequirements,
        exact: bool,
    ) -> Result<Vec<HostTemplate>, Failure>;
    /// Find an image by name.
    async fn search_image(&self, name: &str) -> Result<Image, Failure>;

    /// Provider-scoped configuration.
    async fn get_configuration_options(&self) -> Result<ConfigurationOptions, Failure>;
    /// Capabilities of the provider.
    fn get_capabilities(&self) -> Capabilities;

    /// Register an SSH key pair.
    async fn create_key_pair(&self, name: &str) -> Result<KeyPair, Failure>;

    /// Create a host.
    async fn create_host(&self, request: &HostRequest) -> Result<CreatedHost, Failure>;
    /// Delete the host with the given provider id.
    async fn delete_host(&self, id: &str) -> Result<(), Failure>;
    /// Connection details for reaching a host.
    async fn get_ssh_config(&self, host_id: &str) -> Result<SshConfig, Failure>;
}

/// The named contract to the external SSH runner driving userdata phases.
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    /// Run one bootstrap phase on the host behind `ssh`.
    async fn run_phase(
        &self,
        ssh: &SshConfig,
        phase: Phase,
        content: &Content,
    ) -> Result<(), Failure>;
}
