//! Network resource and its orchestration.
//!
//! Network creation is the most involved composition in the core: it stacks
//! provider primitives (L3 network, virtual IP, gateway hosts, key pair)
//! into a single safe operation with compensating rollback, then drives the
//! gateways' remaining bootstrap phases before declaring the network ready.
//! Deletion walks the same resources in reverse with per-step tolerance
//! rules.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::abstractions::{
    HostRequest, Network as AbstractNetwork, NetworkHosts, NetworkRequest, NetworkState,
    SizingRequirements, VirtualIp, cidr_is_routable,
};
use crate::concurrency::Task;
use crate::fail::{self, Failure, FailureKind, Rollback};
use crate::iaas::Service;
use crate::protocol;
use crate::retry::{self, Verdict};
use crate::userdata::Phase;

use super::core::Core;
use super::host::Host;

/// Metadata folder name for networks.
pub const NETWORKS_FOLDER: &str = "networks";

/// Delay between polls while waiting for a provider network to disappear.
const DELETE_POLL_DELAY: Duration = Duration::from_secs(1);

/// A network under management.
#[derive(Clone)]
pub struct Network {
    core: Arc<Core<AbstractNetwork>>,
    service: Service,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network").field("id", &self.id()).finish()
    }
}

impl Network {
    /// A null network bound to `service`.
    pub fn new(service: &Service) -> Self {
        Self {
            core: Arc::new(Core::new("network", service.metadata_folder(NETWORKS_FOLDER))),
            service: service.clone(),
        }
    }

    /// Load the network metadata referenced by id or name.
    pub async fn load(task: &Task, service: &Service, reference: &str) -> Result<Network, Failure> {
        let network = Network::new(service);
        network.core.read(task, reference).await?;
        Ok(network)
    }

    /// Provider-assigned network id.
    pub fn id(&self) -> String {
        self.core.cached_id()
    }

    /// User-facing network name.
    pub fn name(&self) -> String {
        self.core.cached_name()
    }

    /// Create the network described by `request`.
    ///
    /// `gateway_name` overrides the derived primary gateway name for
    /// non-failover networks; `sizing` selects the gateway template. Every
    /// irreversible step registers a compensating action, taken in reverse
    /// order when a later step fails, unless the request asks to keep
    /// partial resources for forensics. Compensation errors are recorded as
    /// consequences of the primary failure, never replacing it.
    pub async fn create(
        &self,
        task: &Task,
        request: NetworkRequest,
        gateway_name: Option<String>,
        sizing: SizingRequirements,
    ) -> Result<(), Failure> {
        let keep_on_failure = request.keep_on_failure;
        let mut rollback = Rollback::new();
        let outcome = fail::panic_shield(self.create_steps(
            task,
            request,
            gateway_name,
            sizing,
            &mut rollback,
        ))
        .await;
        match outcome {
            Ok(()) => Ok(()),
            Err(failure) if !keep_on_failure => Err(rollback.unwind(failure).await),
            Err(failure) => Err(failure),
        }
    }

    async fn create_steps(
        &self,
        task: &Task,
        mut request: NetworkRequest,
        gateway_name: Option<String>,
        mut sizing: SizingRequirements,
        rollback: &mut Rollback,
    ) -> Result<(), Failure> {
        task.check_abort()?;

        // A network of that name must not already be under management.
        match Network::load(task, &self.service, &request.name).await {
            Ok(_) => {
                return Err(Failure::duplicate(format!(
                    "network '{}' already exists",
                    request.name
                )));
            }
            Err(failure) if failure.is(FailureKind::NotFound) => {}
            Err(failure) => return Err(failure),
        }

        // Nor may the provider hold a stranger network of that name.
        match self.service.get_network_by_name(&request.name).await {
            Ok(_) => {
                return Err(Failure::duplicate(format!(
                    "network '{}' already exists (not managed by this tenant)",
                    request.name
                )));
            }
            Err(failure) if failure.is(FailureKind::NotFound) => {}
            Err(failure) => return Err(failure),
        }

        if !request.cidr.is_empty() {
            let routable = cidr_is_routable(&request.cidr).map_err(|failure| {
                Failure::wrap(failure, "failed to determine whether the CIDR is routable")
            })?;
            if routable {
                return Err(Failure::invalid_request(
                    "cannot create such a network, CIDR must not be routable; \
                     please choose an appropriate CIDR (RFC1918)",
                ));
            }
        }

        task.check_abort()?;
        info!(name = %request.name, cidr = %request.cidr, "creating network");
        let mut network = self.service.create_network(&request).await?;
        {
            let service = self.service.clone();
            let network_id = network.id.clone();
            rollback.push("delete provider network", move || async move {
                service.delete_network(&network_id).await
            });
        }
        network.network_state = NetworkState::GatewayCreation;

        let mut failover = request.ha;
        if failover && !self.service.capabilities().private_virtual_ip {
            warn!(
                "provider does not support private virtual IPs, cannot set up \
                 high availability of the network default route"
            );
            failover = false;
        }
        if failover {
            let vip = self
                .service
                .create_vip(
                    &network.id,
                    &format!("for gateways of network {}", network.name),
                )
                .await?;
            {
                let service = self.service.clone();
                let vip = vip.clone();
                rollback.push("delete virtual ip", move || async move {
                    service.delete_vip(&vip).await
                });
            }
            network.vip = Some(vip);
        }

        self.core.carry(task, network.clone()).await?;
        {
            let core = self.core.clone();
            let cleanup_task = task.clone();
            rollback.push("delete network metadata", move || async move {
                core.delete(&cleanup_task).await
            });
        }

        let templates = self
            .service
            .select_templates_by_size(&sizing, false)
            .await
            .map_err(|failure| Failure::wrap(failure, "failed to find appropriate template"))?;
        let Some(template) = templates.first().cloned() else {
            return Err(Failure::not_found(
                "no host template matching requirements for gateway",
            ));
        };
        info!(
            template = %template.name,
            cores = template.cores,
            ram_gb = template.ram_gb,
            disk_gb = template.disk_gb,
            "selected gateway template"
        );

        if request.image.is_empty() {
            request.image = sizing.image.clone();
        }
        if request.image.is_empty() {
            let options = self.service.configuration_options().await?;
            request.image = options.default_image.clone();
            sizing.image = options.default_image;
        }
        let image = self
            .service
            .search_image(&request.image)
            .await
            .map_err(|failure| Failure::wrap(failure, "unable to create network gateway"))?;

        let network_name = network.name.clone();
        let primary_gateway_name = match &gateway_name {
            Some(name) if !failover && !name.is_empty() => name.clone(),
            _ => format!("gw-{network_name}"),
        };
        let secondary_gateway_name = failover.then(|| format!("gw2-{network_name}"));
        let domain = {
            let trimmed = request.domain.trim_matches('.');
            if trimmed.is_empty() {
                String::new()
            } else {
                format!(".{trimmed}")
            }
        };

        let key_pair = self
            .service
            .create_key_pair(&format!("kp_{network_name}"))
            .await?;

        let base_request = HostRequest {
            resource_name: String::new(),
            host_name: String::new(),
            network_ids: vec![network.id.clone()],
            key_pair,
            template_id: template.id.clone(),
            image_id: image.id.clone(),
            is_gateway: true,
            public_ip: true,
            keep_on_failure: request.keep_on_failure,
        };

        task.check_abort()?;

        let primary_subtask = {
            let service = self.service.clone();
            let mut gateway_request = base_request.clone();
            gateway_request.resource_name = primary_gateway_name.clone();
            gateway_request.host_name = format!("{primary_gateway_name}{domain}");
            task.start_in_subtask(move |subtask| async move {
                Host::create_gateway(&subtask, &service, gateway_request).await
            })
        };
        let secondary = secondary_gateway_name.map(|name| {
            let service = self.service.clone();
            let mut gateway_request = base_request.clone();
            gateway_request.resource_name = name.clone();
            gateway_request.host_name = format!("{name}{domain}");
            let subtask = task.start_in_subtask(move |subtask| async move {
                Host::create_gateway(&subtask, &service, gateway_request).await
            });
            (name, subtask)
        });

        let vip_for_cleanup = network.vip.clone();
        let mut primary_error = None;
        let mut primary_pair = None;
        match primary_subtask.wait().await {
            Ok((gateway, userdata)) => {
                self.register_gateway_cleanup(rollback, task, &gateway, vip_for_cleanup.clone());
                primary_pair = Some((gateway, userdata));
            }
            Err(failure) => {
                primary_error = Some(Failure::wrap(
                    failure,
                    format!("failed to create gateway '{primary_gateway_name}'"),
                ));
            }
        }
        let mut secondary_error = None;
        let mut secondary_pair = None;
        if let Some((name, subtask)) = secondary {
            match subtask.wait().await {
                Ok((gateway, userdata)) => {
                    self.register_gateway_cleanup(rollback, task, &gateway, vip_for_cleanup);
                    secondary_pair = Some((gateway, userdata));
                }
                Err(failure) => {
                    secondary_error = Some(Failure::wrap(
                        failure,
                        format!("failed to create gateway '{name}'"),
                    ));
                }
            }
        }
        // The primary's error takes precedence over the secondary's.
        if let Some(failure) = primary_error {
            return Err(failure);
        }
        if let Some(failure) = secondary_error {
            return Err(failure);
        }
        let Some((primary_gateway, mut primary_userdata)) = primary_pair else {
            return Err(Failure::inconsistent(
                "primary gateway creation yielded no result",
            ));
        };

        task.check_abort()?;
        let primary_private_ip = primary_gateway.private_ip(task).await?;
        let primary_public_ip = primary_gateway.public_ip(task).await?;
        let primary_gateway_id = primary_gateway.id();
        let secondary_ips = match &secondary_pair {
            Some((gateway, _)) => Some((
                gateway.private_ip(task).await?,
                gateway.public_ip(task).await?,
                gateway.id(),
            )),
            None => None,
        };
        let mut secondary_userdata = secondary_pair
            .as_ref()
            .map(|(_, userdata)| userdata.clone());

        self.core
            .alter(task, async |network, _props| {
                network.gateway_id = primary_gateway_id.clone();
                primary_userdata.primary_gateway_private_ip = primary_private_ip.clone();
                primary_userdata.primary_gateway_public_ip = primary_public_ip.clone();
                primary_userdata.is_primary_gateway = true;
                if let Some(vip) = &network.vip {
                    primary_userdata.default_route_ip = vip.private_ip.clone();
                    primary_userdata.endpoint_ip = vip.public_ip.clone();
                } else {
                    primary_userdata.default_route_ip =
                        primary_userdata.primary_gateway_private_ip.clone();
                    primary_userdata.endpoint_ip =
                        primary_userdata.primary_gateway_public_ip.clone();
                }
                if let (Some((private_ip, public_ip, id)), Some(secondary_userdata)) =
                    (&secondary_ips, secondary_userdata.as_mut())
                {
                    network.secondary_gateway_id = id.clone();
                    primary_userdata.secondary_gateway_private_ip = private_ip.clone();
                    primary_userdata.secondary_gateway_public_ip = public_ip.clone();
                    secondary_userdata.primary_gateway_private_ip =
                        primary_userdata.primary_gateway_private_ip.clone();
                    secondary_userdata.primary_gateway_public_ip =
                        primary_userdata.primary_gateway_public_ip.clone();
                    secondary_userdata.secondary_gateway_private_ip =
                        primary_userdata.secondary_gateway_private_ip.clone();
                    secondary_userdata.secondary_gateway_public_ip =
                        primary_userdata.secondary_gateway_public_ip.clone();
                    secondary_userdata.is_primary_gateway = false;
                }
                Ok(())
            })
            .await?;

        // Gateways stopped their first boot after 'netsec'; run the
        // remaining phases now that the routing facts are known.
        self.core
            .alter(task, async |network, _props| {
                network.network_state = NetworkState::GatewayConfiguration;
                Ok(())
            })
            .await?;

        let primary_phases = {
            let gateway = primary_gateway.clone();
            let content = primary_userdata.clone();
            task.start_in_subtask(move |subtask| async move {
                gateway
                    .run_bootstrap_phases(&subtask, &content, &Phase::finalization())
                    .await
            })
        };
        let secondary_phases = match (&secondary_pair, &secondary_userdata) {
            (Some((gateway, _)), Some(content)) => {
                let gateway = gateway.clone();
                let content = content.clone();
                Some(task.start_in_subtask(move |subtask| async move {
                    gateway
                        .run_bootstrap_phases(&subtask, &content, &Phase::finalization())
                        .await
                }))
            }
            _ => None,
        };
        let primary_result = primary_phases.wait().await;
        let secondary_result = match secondary_phases {
            Some(subtask) => subtask.wait().await,
            None => Ok(()),
        };
        primary_result?;
        secondary_result?;

        self.core
            .alter(task, async |network, _props| {
                network.network_state = NetworkState::Ready;
                Ok(())
            })
            .await?;
        info!(name = %network_name, "network created");
        Ok(())
    }

    fn register_gateway_cleanup(
        &self,
        rollback: &mut Rollback,
        task: &Task,
        gateway: &Host,
        vip: Option<VirtualIp>,
    ) {
        let service = self.service.clone();
        let gateway = gateway.clone();
        let task = task.clone();
        rollback.push(
            format!("delete gateway '{}'", gateway.name()),
            move || async move {
                let mut outcome = gateway.delete(&task).await;
                if let Some(vip) = vip
                    && let Err(unbind) = service.unbind_host_from_vip(&vip, &gateway.id()).await
                {
                    outcome = match outcome {
                        Ok(()) => Err(unbind),
                        Err(mut failure) => {
                            failure.add_consequence(unbind);
                            Err(failure)
                        }
                    };
                }
                outcome
            },
        );
    }

    /// Delete the network, its gateways and its virtual IP.
    ///
    /// Refuses while hosts remain attached. Absence of any resource along
    /// the way counts as progress, not failure; a provider-side deletion
    /// timeout degrades into a bounded poll for the network's disappearance.
    pub async fn delete(&self, task: &Task) -> Result<(), Failure> {
        fail::panic_shield(self.delete_steps(task)).await
    }

    async fn delete_steps(&self, task: &Task) -> Result<(), Failure> {
        let service = self.service.clone();
        self.core
            .alter(task, async |network, props| {
                let attached = match props
                    .inspect::<NetworkHosts, _, _>(task, |hosts| {
                        Ok(hosts.by_name.keys().cloned().collect::<Vec<_>>())
                    })
                    .await
                {
                    Ok(names) => names,
                    Err(failure) if failure.is(FailureKind::NotFound) => Vec::new(),
                    Err(failure) => return Err(failure),
                };
                if !attached.is_empty() {
                    let count = attached.len();
                    let (plural, verb) = if count == 1 { ("", "is") } else { ("s", "are") };
                    return Err(Failure::not_available(format!(
                        "cannot delete network '{}': {count} host{plural} {verb} still \
                         attached to it: {}",
                        network.name,
                        attached.join(", ")
                    )));
                }

                task.check_abort()?;

                for (label, gateway_id) in [
                    ("primary", &network.gateway_id),
                    ("secondary", &network.secondary_gateway_id),
                ] {
                    if gateway_id.is_empty() {
                        continue;
                    }
                    match Host::load(task, &service, gateway_id).await {
                        Ok(gateway) => {
                            debug!(gateway = %gateway.name(), "deleting gateway");
                            gateway.delete(task).await.map_err(|failure| {
                                Failure::wrap(
                                    failure,
                                    format!("failed to delete gateway '{}'", gateway.name()),
                                )
                            })?;
                        }
                        Err(failure) if failure.is(FailureKind::NotFound) => {
                            info!(
                                network = %network.name,
                                "{label} gateway appears to be already deleted"
                            );
                        }
                        Err(failure) => return Err(failure),
                    }
                }

                if let Some(vip) = &network.vip
                    && let Err(failure) = service.delete_vip(vip).await
                {
                    // A stranded VIP is recoverable by hand; a blocked
                    // deletion is not.
                    error!(vip = %vip.id, error = %failure, "failed to delete virtual ip");
                }

                match service.delete_network(&network.id).await {
                    Ok(()) => {}
                    Err(failure) if failure.is(FailureKind::NotFound) => {
                        warn!(
                            network = %network.name,
                            "network not found on provider side, cleaning up metadata"
                        );
                    }
                    Err(failure) if failure.is(FailureKind::Timeout) => {
                        let options = service.configuration_options().await?;
                        let poll = retry::bounded(
                            DELETE_POLL_DELAY,
                            options.operation_timeout,
                            || async {
                                match service.get_network(&network.id).await {
                                    Ok(_) => Verdict::Retry(Failure::not_available(
                                        "network still present",
                                    )),
                                    Err(inner) if inner.is(FailureKind::NotFound) => {
                                        Verdict::Done(())
                                    }
                                    Err(inner) => Verdict::Stop(Failure::wrap(
                                        inner,
                                        "unexpected error while waiting for network disappearance",
                                    )),
                                }
                            },
                        )
                        .await;
                        if let Err(retry_error) = poll {
                            let mut primary = failure;
                            primary.add_consequence(retry_error.into_failure());
                            return Err(primary);
                        }
                    }
                    Err(failure) => return Err(failure),
                }
                Ok(())
            })
            .await?;
        self.core.delete(task).await
    }

    /// The gateway of the network; `primary` selects which one.
    pub async fn gateway(&self, task: &Task, primary: bool) -> Result<Host, Failure> {
        let which = if primary { "primary" } else { "secondary" };
        let gateway_id = self
            .core
            .inspect(task, async |network, _props| {
                Ok(if primary {
                    network.gateway_id.clone()
                } else {
                    network.secondary_gateway_id.clone()
                })
            })
            .await?;
        if gateway_id.is_empty() {
            return Err(Failure::not_found(format!("no {which} gateway ID found")));
        }
        Host::load(task, &self.service, &gateway_id).await
    }

    /// The address hosts of this network use as default route: the virtual
    /// IP when one exists, the primary gateway's private address otherwise.
    pub async fn default_route_ip(&self, task: &Task) -> Result<String, Failure> {
        let (vip_ip, gateway_id) = self
            .core
            .inspect(task, async |network, _props| {
                Ok((
                    network
                        .vip
                        .as_ref()
                        .map(|vip| vip.private_ip.clone())
                        .unwrap_or_default(),
                    network.gateway_id.clone(),
                ))
            })
            .await?;
        if !vip_ip.is_empty() {
            return Ok(vip_ip);
        }
        let gateway = Host::load(task, &self.service, &gateway_id).await?;
        gateway.private_ip(task).await
    }

    /// The address the network is reachable at from outside: the virtual
    /// IP's public address when one exists, the primary gateway's otherwise.
    pub async fn endpoint_ip(&self, task: &Task) -> Result<String, Failure> {
        let (vip_ip, gateway_id) = self
            .core
            .inspect(task, async |network, _props| {
                Ok((
                    network
                        .vip
                        .as_ref()
                        .map(|vip| vip.public_ip.clone())
                        .unwrap_or_default(),
                    network.gateway_id.clone(),
                ))
            })
            .await?;
        if !vip_ip.is_empty() {
            return Ok(vip_ip);
        }
        let gateway = Host::load(task, &self.service, &gateway_id).await?;
        gateway.public_ip(task).await
    }

    /// True when the network carries a virtual IP.
    pub async fn has_virtual_ip(&self, task: &Task) -> Result<bool, Failure> {
        self.core
            .inspect(task, async |network, _props| Ok(network.vip.is_some()))
            .await
    }

    /// The virtual IP used by gateway failover.
    pub async fn virtual_ip(&self, task: &Task) -> Result<VirtualIp, Failure> {
        let vip = self
            .core
            .inspect(task, async |network, _props| Ok(network.vip.clone()))
            .await?;
        vip.ok_or_else(|| {
            Failure::not_found(format!(
                "failed to find a virtual IP bound to gateways of network '{}'",
                self.name()
            ))
        })
    }

    /// The network's address block.
    pub async fn cidr(&self, task: &Task) -> Result<String, Failure> {
        self.core
            .inspect(task, async |network, _props| Ok(network.cidr.clone()))
            .await
    }

    /// The current lifecycle state of the network.
    pub async fn state(&self, task: &Task) -> Result<NetworkState, Failure> {
        self.core
            .inspect(task, async |network, _props| Ok(network.network_state))
            .await
    }

    /// Register a host on the network.
    ///
    /// Registering the same host twice leaves the registry unchanged.
    pub async fn attach_host(&self, task: &Task, host: &Host) -> Result<(), Failure> {
        fail::panic_shield(async {
            let host_id = host.id();
            let host_name = host.name();
            debug!(network = %self.name(), host = %host_name, "attaching host");
            self.core
                .alter(task, async |_network, props| {
                    props
                        .alter::<NetworkHosts, _, _>(task, |hosts| {
                            hosts.by_id.insert(host_id.clone(), host_name.clone());
                            hosts.by_name.insert(host_name.clone(), host_id.clone());
                            Ok(())
                        })
                        .await
                })
                .await
        })
        .await
    }

    /// Unregister a host from the network.
    ///
    /// Unregistering an unknown id is a no-op.
    pub async fn detach_host(&self, task: &Task, host_id: &str) -> Result<(), Failure> {
        fail::panic_shield(async {
            debug!(network = %self.name(), host = %host_id, "detaching host");
            self.core
                .alter(task, async |_network, props| {
                    props
                        .alter::<NetworkHosts, _, _>(task, |hosts| {
                            if let Some(name) = hosts.by_id.remove(host_id) {
                                hosts.by_name.remove(&name);
                            }
                            Ok(())
                        })
                        .await
                })
                .await
        })
        .await
    }

    /// The hosts registered on the network, gateways excluded.
    pub async fn list_hosts(&self, task: &Task) -> Result<Vec<Host>, Failure> {
        let ids = self
            .core
            .inspect(task, async |_network, props| {
                match props
                    .inspect::<NetworkHosts, _, _>(task, |hosts| {
                        Ok(hosts.by_id.keys().cloned().collect::<Vec<_>>())
                    })
                    .await
                {
                    Ok(ids) => Ok(ids),
                    Err(failure) if failure.is(FailureKind::NotFound) => Ok(Vec::new()),
                    Err(failure) => Err(failure),
                }
            })
            .await?;
        let mut hosts = Vec::with_capacity(ids.len());
        for id in ids {
            hosts.push(Host::load(task, &self.service, &id).await?);
        }
        Ok(hosts)
    }

    /// Iterate every network of this tenant, deserialised.
    pub async fn browse<F>(&self, task: &Task, mut callback: F) -> Result<(), Failure>
    where
        F: FnMut(AbstractNetwork) -> Result<(), Failure>,
    {
        self.core
            .browse(task, |raw| {
                let network: AbstractNetwork = serde_json::from_slice(raw).map_err(|err| {
                    Failure::invalid_instance_content(format!(
                        "failed to deserialize network metadata: {err}"
                    ))
                })?;
                callback(network)
            })
            .await
    }

    /// Export the service-facing projection of the network.
    pub async fn to_protocol(&self, task: &Task) -> Result<protocol::Network, Failure> {
        let primary = self.gateway(task, true).await?;
        let secondary_gateway_id = match self.gateway(task, false).await {
            Ok(gateway) => gateway.id(),
            Err(failure) if failure.is(FailureKind::NotFound) => String::new(),
            Err(failure) => return Err(failure),
        };
        let (id, name, cidr, vip) = self
            .core
            .inspect(task, async |network, _props| {
                Ok((
                    network.id.clone(),
                    network.name.clone(),
                    network.cidr.clone(),
                    network.vip.clone(),
                ))
            })
            .await?;
        Ok(protocol::Network {
            id,
            name,
            cidr,
            gateway_id: primary.id(),
            secondary_gateway_id,
            failover: vip.is_some(),
            virtual_ip: vip.map(protocol::VirtualIp::from),
        })
    }
}
