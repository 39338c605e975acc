//! Uniform service facade over a provider driver.

use std::sync::Arc;

use tracing::debug;

use crate::abstractions::{
    HostRequest, HostTemplate, Image, KeyPair, Network, NetworkRequest, SizingRequirements,
    SshConfig, VirtualIp,
};
use crate::fail::Failure;
use crate::metadata::MetadataFolder;
use crate::objectstorage::ObjectStorage;

use super::{Capabilities, ConfigurationOptions, CreatedHost, PhaseRunner, ProviderDriver};

/// The uniform view the resources consume.
///
/// Couples one provider driver with the object storage bucket holding this
/// tenant's metadata and the runner for userdata phases. Cheap to clone;
/// all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct Service {
    driver: Arc<dyn ProviderDriver>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    runner: Arc<dyn PhaseRunner>,
}

impl Service {
    /// Assemble a service from its collaborators.
    pub fn new(
        driver: Arc<dyn ProviderDriver>,
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
        runner: Arc<dyn PhaseRunner>,
    ) -> Self {
        Self {
            driver,
            storage,
            bucket: bucket.into(),
            runner,
        }
    }

    /// The metadata folder for a resource kind.
    pub fn metadata_folder(&self, kind: &'static str) -> MetadataFolder {
        MetadataFolder::new(self.storage.clone(), self.bucket.clone(), kind)
    }

    /// The runner driving userdata phases.
    pub fn phase_runner(&self) -> &Arc<dyn PhaseRunner> {
        &self.runner
    }

    /// Provider capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.driver.get_capabilities()
    }

    /// Provider-scoped configuration.
    pub async fn configuration_options(&self) -> Result<ConfigurationOptions, Failure> {
        self.driver.get_configuration_options().await
    }

    /// Create an L3 network at the provider.
    pub async fn create_network(&self, request: &NetworkRequest) -> Result<Network, Failure> {
        debug!(name = %request.name, cidr = %request.cidr, "provider: create network");
        self.driver.create_network(request).await
    }

    /// Delete a provider network by id.
    pub async fn delete_network(&self, id: &str) -> Result<(), Failure> {
        debug!(%id, "provider: delete network");
        self.driver.delete_network(id).await
    }

    /// Fetch a provider network by id.
    pub async fn get_network(&self, id: &str) -> Result<Network, Failure> {
        self.driver.get_network(id).await
    }

    /// Fetch a provider network by name.
    pub async fn get_network_by_name(&self, name: &str) -> Result<Network, Failure> {
        self.driver.get_network_by_name(name).await
    }

    /// Create a virtual IP on a network.
    pub async fn create_vip(&self, network_id: &str, name: &str) -> Result<VirtualIp, Failure> {
        debug!(%network_id, %name, "provider: create vip");
        self.driver.create_vip(network_id, name).await
    }

    /// Delete a virtual IP.
    pub async fn delete_vip(&self, vip: &VirtualIp) -> Result<(), Failure> {
        debug!(id = %vip.id, "provider: delete vip");
        self.driver.delete_vip(vip).await
    }

    /// Unbind a host from a virtual IP.
    pub async fn unbind_host_from_vip(
        &self,
        vip: &VirtualIp,
        host_id: &str,
    ) -> Result<(), Failure> {
        debug!(vip = %vip.id, %host_id, "provider: unbind host from vip");
        self.driver.unbind_host_from_vip(vip, host_id).await
    }

    /// Templates matching the sizing.
    pub async fn select_templates_by_size(
        &self,
        sizing: &SizingRequirements,
        exact: bool,
    ) -> Result<Vec<HostTemplate>, Failure> {
        self.driver.select_templates_by_size(sizing, exact).await
    }

    /// Find an image by name.
    pub async fn search_image(&self, name: &str) -> Result<Image, Failure> {
        self.driver.search_image(name).await
    }

    /// Register an SSH key pair.
    pub async fn create_key_pair(&self, name: &str) -> Result<KeyPair, Failure> {
        debug!(%name, "provider: create key pair");
        self.driver.create_key_pair(name).await
    }

    /// Create a host.
    pub async fn create_host(&self, request: &HostRequest) -> Result<CreatedHost, Failure> {
        debug!(name = %request.resource_name, "provider: create host");
        self.driver.create_host(request).await
    }

    /// Delete a host by id.
    pub async fn delete_host(&self, id: &str) -> Result<(), Failure> {
        debug!(%id, "provider: delete host");
        self.driver.delete_host(id).await
    }

    /// Connection details for reaching a host.
    pub async fn get_ssh_config(&self, host_id: &str) -> Result<SshConfig, Failure> {
        self.driver.get_ssh_config(host_id).await
    }
}
