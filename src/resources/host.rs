//! Host resource.
//!
//! The orchestration core only needs the slice of the host lifecycle that
//! networks consume: loading a host by reference, reading its addresses from
//! the `network.v1` property, creating gateway hosts and driving their
//! remaining bootstrap phases, and deleting them again. The full host
//! surface (feature installation, SSH sessions, resizing) lives outside this
//! core.

use std::sync::Arc;

use tracing::debug;

use crate::abstractions::{HostCore, HostNetworking, HostRequest};
use crate::concurrency::Task;
use crate::fail::{self, Failure, FailureKind};
use crate::iaas::Service;
use crate::userdata::{Content, Phase};

use super::core::Core;

/// Metadata folder name for hosts.
pub const HOSTS_FOLDER: &str = "hosts";

/// A host under management.
#[derive(Clone)]
pub struct Host {
    core: Arc<Core<HostCore>>,
    service: Service,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").field("id", &self.id()).finish()
    }
}

impl Host {
    /// A null host bound to `service`.
    pub fn new(service: &Service) -> Self {
        Self {
            core: Arc::new(Core::new("host", service.metadata_folder(HOSTS_FOLDER))),
            service: service.clone(),
        }
    }

    /// Load the host metadata referenced by id or name.
    pub async fn load(task: &Task, service: &Service, reference: &str) -> Result<Host, Failure> {
        let host = Host::new(service);
        host.core.read(task, reference).await?;
        Ok(host)
    }

    /// Provider-assigned host id.
    pub fn id(&self) -> String {
        self.core.cached_id()
    }

    /// User-facing host name.
    pub fn name(&self) -> String {
        self.core.cached_name()
    }

    /// The host's private address on its default network.
    pub async fn private_ip(&self, task: &Task) -> Result<String, Failure> {
        self.core
            .inspect(task, async |_host, props| {
                props
                    .inspect::<HostNetworking, _, _>(task, |networking| {
                        networking
                            .default_private_ip()
                            .map(str::to_string)
                            .ok_or_else(|| {
                                Failure::not_found("host has no private IP on its default network")
                            })
                    })
                    .await
            })
            .await
    }

    /// The host's public address, when it has one.
    pub async fn public_ip(&self, task: &Task) -> Result<String, Failure> {
        self.core
            .inspect(task, async |_host, props| {
                props
                    .inspect::<HostNetworking, _, _>(task, |networking| {
                        if networking.public_ip_v4.is_empty() {
                            return Err(Failure::not_found("host has no public IP"));
                        }
                        Ok(networking.public_ip_v4.clone())
                    })
                    .await
            })
            .await
    }

    /// Create a gateway host: ask the provider for the host, pin its
    /// metadata and record its networking view.
    ///
    /// This is the body of the gateway-creation subtasks started by network
    /// creation; it returns the host together with the userdata the
    /// remaining bootstrap phases need. On a metadata failure the
    /// provider-side host is deleted again unless the request asks to keep
    /// resources on failure.
    pub async fn create_gateway(
        task: &Task,
        service: &Service,
        request: HostRequest,
    ) -> Result<(Host, Content), Failure> {
        fail::panic_shield(async {
            task.check_abort()?;
            debug!(name = %request.resource_name, "creating gateway host");
            let created = service.create_host(&request).await.map_err(|failure| {
                Failure::wrap(
                    failure,
                    format!("failed to create gateway host '{}'", request.resource_name),
                )
            })?;

            let host = Host::new(service);
            let metadata = async {
                host.core.carry(task, created.core.clone()).await?;
                host.core
                    .alter(task, async |_host, props| {
                        props
                            .alter::<HostNetworking, _, _>(task, |networking| {
                                *networking = created.networking.clone();
                                networking.is_gateway = true;
                                Ok(())
                            })
                            .await
                    })
                    .await
            }
            .await;

            if let Err(mut failure) = metadata {
                if !request.keep_on_failure {
                    if let Err(cleanup) = service.delete_host(&created.core.id).await {
                        failure.add_consequence(cleanup);
                    }
                }
                return Err(failure);
            }
            Ok((host, created.userdata))
        })
        .await
    }

    /// Drive the remaining userdata phases on this host.
    ///
    /// Gateways stop their first boot after the `netsec` phase; once the
    /// network's routing facts are known the orchestration runs the rest
    /// through the external phase runner.
    pub async fn run_bootstrap_phases(
        &self,
        task: &Task,
        content: &Content,
        phases: &[Phase],
    ) -> Result<(), Failure> {
        let ssh = self.service.get_ssh_config(&self.id()).await?;
        for phase in phases {
            task.check_abort()?;
            debug!(host = %self.name(), %phase, "running userdata phase");
            self.service
                .phase_runner()
                .run_phase(&ssh, *phase, content)
                .await
                .map_err(|failure| {
                    Failure::wrap(
                        failure,
                        format!("phase '{phase}' failed on host '{}'", self.name()),
                    )
                })?;
        }
        Ok(())
    }

    /// Delete the provider host and its metadata.
    ///
    /// Absence at either step counts as success; other failures are
    /// accumulated and reported as one aggregate.
    pub async fn delete(&self, task: &Task) -> Result<(), Failure> {
        let name = self.name();
        let mut failures: Vec<Failure> = Vec::new();
        match self.service.delete_host(&self.id()).await {
            Ok(()) => {}
            Err(failure) if failure.is(FailureKind::NotFound) => {}
            Err(failure) => {
                failures.push(Failure::wrap(
                    failure,
                    format!("failed to delete host '{name}'"),
                ));
            }
        }
        match self.core.delete(task).await {
            Ok(()) => {}
            Err(failure) if failure.is(FailureKind::NotFound) => {}
            Err(failure) => {
                failures.push(Failure::wrap(
                    failure,
                    format!("failed to delete metadata of host '{name}'"),
                ));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Failure::list(failures))
        }
    }
}
