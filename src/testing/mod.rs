//! Deterministic fixtures for tests.
//!
//! [`FakeDriver`] is an in-memory provider driver with failure-injection
//! knobs and call recording; [`RecordingPhaseRunner`] records the userdata
//! phases the orchestration drives. Both mirror production behaviour without
//! network I/O, so integration scenarios run repeatably.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::abstractions::{
    HostCore, HostNetworking, HostRequest, HostTemplate, Image, KeyPair, Network, NetworkRequest,
    SizingRequirements, SshConfig, VirtualIp,
};
use crate::fail::Failure;
use crate::iaas::{
    Capabilities, ConfigurationOptions, CreatedHost, PhaseRunner, ProviderDriver, Service,
};
use crate::objectstorage::MemoryStorage;
use crate::userdata::{Content, Phase};

/// Assemble a [`Service`] over a fake driver, a fresh in-memory object
/// store and a phase runner.
pub fn service_with(driver: Arc<FakeDriver>, runner: Arc<RecordingPhaseRunner>) -> Service {
    Service::new(driver, Arc::new(MemoryStorage::new()), "metadata", runner)
}

/// In-memory provider driver.
pub struct FakeDriver {
    capabilities: Mutex<Capabilities>,
    options: Mutex<ConfigurationOptions>,
    templates: Vec<HostTemplate>,
    images: Vec<Image>,
    networks: DashMap<String, Network>,
    hosts: DashMap<String, CreatedHost>,
    vips: DashMap<String, VirtualIp>,
    key_pairs: DashMap<String, KeyPair>,
    failing_hosts: Mutex<HashSet<String>>,
    timeout_on_delete_network: Mutex<bool>,
    delete_network_calls: AtomicUsize,
    host_counter: AtomicU32,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self {
            capabilities: Mutex::new(Capabilities {
                private_virtual_ip: true,
                public_virtual_ip: false,
            }),
            options: Mutex::new(ConfigurationOptions {
                default_image: "ubuntu-20.04".to_string(),
                ..ConfigurationOptions::default()
            }),
            templates: vec![
                HostTemplate {
                    id: "t-small".into(),
                    name: "small".into(),
                    cores: 2,
                    cpu_freq: 2.4,
                    gpu_count: 0,
                    gpu_type: String::new(),
                    ram_gb: 4.0,
                    disk_gb: 40,
                },
                HostTemplate {
                    id: "t-large".into(),
                    name: "large".into(),
                    cores: 8,
                    cpu_freq: 3.0,
                    gpu_count: 0,
                    gpu_type: String::new(),
                    ram_gb: 32.0,
                    disk_gb: 200,
                },
            ],
            images: vec![
                Image {
                    id: "img-ubuntu".into(),
                    name: "ubuntu-20.04".into(),
                },
                Image {
                    id: "img-debian".into(),
                    name: "debian-12".into(),
                },
            ],
            networks: DashMap::new(),
            hosts: DashMap::new(),
            vips: DashMap::new(),
            key_pairs: DashMap::new(),
            failing_hosts: Mutex::new(HashSet::new()),
            timeout_on_delete_network: Mutex::new(false),
            delete_network_calls: AtomicUsize::new(0),
            host_counter: AtomicU32::new(0),
        }
    }
}

impl FakeDriver {
    /// A driver with private-VIP support and two templates.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Toggle the private-VIP capability.
    pub fn set_private_virtual_ip(&self, supported: bool) {
        self.capabilities.lock().private_virtual_ip = supported;
    }

    /// Make creations of the named host fail with a timeout.
    pub fn fail_host_creation(&self, resource_name: &str) {
        self.failing_hosts.lock().insert(resource_name.to_string());
    }

    /// Make network deletions report a timeout even though the provider
    /// completed the work, as slow providers do.
    pub fn timeout_network_deletions(&self) {
        *self.timeout_on_delete_network.lock() = true;
    }

    /// Number of networks currently known to the provider.
    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    /// Number of virtual IPs currently known to the provider.
    pub fn vip_count(&self) -> usize {
        self.vips.len()
    }

    /// Names of hosts currently known to the provider, sorted.
    pub fn host_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .hosts
            .iter()
            .map(|entry| entry.value().core.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of key pairs ever registered, sorted.
    pub fn key_pair_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .key_pairs
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// How many times `delete_network` was called.
    pub fn delete_network_calls(&self) -> usize {
        self.delete_network_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderDriver for FakeDriver {
    async fn create_network(&self, request: &NetworkRequest) -> Result<Network, Failure> {
        let network = Network {
            id: format!("net-{}", Uuid::new_v4()),
            name: request.name.clone(),
            cidr: request.cidr.clone(),
            domain: request.domain.clone(),
            dns_servers: request.dns_servers.clone(),
            ip_version: request.ip_version,
            ..Network::default()
        };
        self.networks.insert(network.id.clone(), network.clone());
        Ok(network)
    }

    async fn delete_network(&self, id: &str) -> Result<(), Failure> {
        self.delete_network_calls.fetch_add(1, Ordering::SeqCst);
        let removed = self.networks.remove(id).is_some();
        if *self.timeout_on_delete_network.lock() {
            return Err(Failure::timeout(format!(
                "deletion of network '{id}' timed out"
            )));
        }
        if removed {
            Ok(())
        } else {
            Err(Failure::not_found(format!("network '{id}' not found")))
        }
    }

    async fn get_network(&self, id: &str) -> Result<Network, Failure> {
        self.networks
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Failure::not_found(format!("network '{id}' not found")))
    }

    async fn get_network_by_name(&self, name: &str) -> Result<Network, Failure> {
        self.networks
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Failure::not_found(format!("network '{name}' not found")))
    }

    async fn create_vip(&self, network_id: &str, name: &str) -> Result<VirtualIp, Failure> {
        let vip = VirtualIp {
            id: format!("vip-{}", Uuid::new_v4()),
            name: name.to_string(),
            network_id: network_id.to_string(),
            private_ip: "192.168.0.254".to_string(),
            public_ip: "203.0.113.254".to_string(),
            hosts: Vec::new(),
        };
        self.vips.insert(vip.id.clone(), vip.clone());
        Ok(vip)
    }

    async fn delete_vip(&self, vip: &VirtualIp) -> Result<(), Failure> {
        self.vips
            .remove(&vip.id)
            .map(|_| ())
            .ok_or_else(|| Failure::not_found(format!("vip '{}' not found", vip.id)))
    }

    async fn unbind_host_from_vip(&self, vip: &VirtualIp, host_id: &str) -> Result<(), Failure> {
        if let Some(mut entry) = self.vips.get_mut(&vip.id) {
            entry.value_mut().hosts.retain(|host| host.id != host_id);
        }
        Ok(())
    }

    async fn select_templates_by_size(
        &self,
        sizing: &SizingRequirements,
        _exact: bool,
    ) -> Result<Vec<HostTemplate>, Failure> {
        let mut matching: Vec<HostTemplate> = self
            .templates
            .iter()
            .filter(|template| {
                template.cores >= sizing.min_cores
                    && template.ram_gb >= sizing.min_ram_gb
                    && template.disk_gb >= sizing.min_disk_gb
                    && template.gpu_count >= sizing.min_gpu
            })
            .cloned()
            .collect();
        matching.sort_by_key(|template| template.cores);
        Ok(matching)
    }

    async fn search_image(&self, name: &str) -> Result<Image, Failure> {
        self.images
            .iter()
            .find(|image| image.name == name)
            .cloned()
            .ok_or_else(|| Failure::not_found(format!("image '{name}' not found")))
    }

    async fn get_configuration_options(&self) -> Result<ConfigurationOptions, Failure> {
        Ok(self.options.lock().clone())
    }

    fn get_capabilities(&self) -> Capabilities {
        *self.capabilities.lock()
    }

    async fn create_key_pair(&self, name: &str) -> Result<KeyPair, Failure> {
        let key_pair = KeyPair {
            id: format!("kp-{}", Uuid::new_v4()),
            name: name.to_string(),
            public_key: "ssh-ed25519 AAAATESTKEY".to_string(),
            private_key: "-----BEGIN TEST KEY-----".to_string(),
        };
        self.key_pairs.insert(name.to_string(), key_pair.clone());
        Ok(key_pair)
    }

    async fn create_host(&self, request: &HostRequest) -> Result<CreatedHost, Failure> {
        if self.failing_hosts.lock().contains(&request.resource_name) {
            return Err(Failure::timeout(format!(
                "provider timed out creating host '{}'",
                request.resource_name
            )));
        }
        let index = self.host_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let default_network_id = request.network_ids.first().cloned().unwrap_or_default();
        let mut networking = HostNetworking {
            is_gateway: request.is_gateway,
            default_network_id: default_network_id.clone(),
            ..HostNetworking::default()
        };
        networking
            .ip_v4_addresses
            .insert(default_network_id, format!("192.168.0.{index}"));
        if request.public_ip {
            networking.public_ip_v4 = format!("203.0.113.{index}");
        }
        let created = CreatedHost {
            core: HostCore {
                id: format!("host-{}", Uuid::new_v4()),
                name: request.resource_name.clone(),
                private_key: request.key_pair.private_key.clone(),
                ssh_port: 22,
            },
            networking,
            userdata: Content {
                host_name: if request.host_name.is_empty() {
                    request.resource_name.clone()
                } else {
                    request.host_name.clone()
                },
                ..Content::default()
            },
        };
        self.hosts.insert(created.core.id.clone(), created.clone());
        Ok(created)
    }

    async fn delete_host(&self, id: &str) -> Result<(), Failure> {
        self.hosts
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Failure::not_found(format!("host '{id}' not found")))
    }

    async fn get_ssh_config(&self, host_id: &str) -> Result<SshConfig, Failure> {
        let entry = self
            .hosts
            .get(host_id)
            .ok_or_else(|| Failure::not_found(format!("host '{host_id}' not found")))?;
        let created = entry.value();
        let address = if created.networking.public_ip_v4.is_empty() {
            created
                .networking
                .default_private_ip()
                .unwrap_or_default()
                .to_string()
        } else {
            created.networking.public_ip_v4.clone()
        };
        Ok(SshConfig {
            host: address,
            port: created.core.ssh_port,
            user: "larch".to_string(),
            private_key: created.core.private_key.clone(),
        })
    }
}

/// Phase runner that records every phase it is asked to run.
#[derive(Default)]
pub struct RecordingPhaseRunner {
    calls: Mutex<Vec<(String, Phase)>>,
}

impl RecordingPhaseRunner {
    /// A runner with an empty record.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The `(host_name, phase)` pairs run so far, in order.
    pub fn calls(&self) -> Vec<(String, Phase)> {
        self.calls.lock().clone()
    }

    /// The phases run on one host, in order.
    pub fn phases_for(&self, host_name: &str) -> Vec<Phase> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == host_name)
            .map(|(_, phase)| *phase)
            .collect()
    }
}

#[async_trait]
impl PhaseRunner for RecordingPhaseRunner {
    async fn run_phase(
        &self,
        _ssh: &SshConfig,
        phase: Phase,
        content: &Content,
    ) -> Result<(), Failure> {
        self.calls.lock().push((content.host_name.clone(), phase));
        Ok(())
    }
}
