//! End-to-end network lifecycle scenarios against the deterministic fixtures.

use std::sync::Arc;

use larch::abstractions::{NetworkRequest, NetworkState, SizingRequirements};
use larch::concurrency::Task;
use larch::fail::FailureKind;
use larch::iaas::Service;
use larch::resources::{Host, Network};
use larch::testing::{FakeDriver, RecordingPhaseRunner, service_with};
use larch::userdata::Phase;

fn request(name: &str, cidr: &str, ha: bool) -> NetworkRequest {
    NetworkRequest {
        name: name.to_string(),
        cidr: cidr.to_string(),
        ha,
        image: "ubuntu-20.04".to_string(),
        ..NetworkRequest::default()
    }
}

fn sizing(cores: u32, ram_gb: f32, disk_gb: u32) -> SizingRequirements {
    SizingRequirements {
        min_cores: cores,
        min_ram_gb: ram_gb,
        min_disk_gb: disk_gb,
        ..SizingRequirements::default()
    }
}

fn harness() -> (Arc<FakeDriver>, Arc<RecordingPhaseRunner>, Service) {
    let driver = FakeDriver::new();
    let runner = RecordingPhaseRunner::new();
    let service = service_with(driver.clone(), runner.clone());
    (driver, runner, service)
}

async fn attachable_host(task: &Task, service: &Service, name: &str, network_id: &str) -> Host {
    let host_request = larch::abstractions::HostRequest {
        resource_name: name.to_string(),
        network_ids: vec![network_id.to_string()],
        public_ip: false,
        ..larch::abstractions::HostRequest::default()
    };
    let (host, _userdata) = Host::create_gateway(task, service, host_request)
        .await
        .expect("host creation");
    host
}

#[tokio::test(start_paused = true)]
async fn happy_path_single_gateway() {
    let (driver, runner, service) = harness();
    let task = Task::new();
    let network = Network::new(&service);

    network
        .create(
            &task,
            request("n1", "192.168.0.0/24", false),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");

    assert_eq!(driver.network_count(), 1);
    assert_eq!(driver.key_pair_names(), vec!["kp_n1"]);
    assert_eq!(driver.host_names(), vec!["gw-n1"]);
    assert_eq!(driver.vip_count(), 0);
    assert_eq!(network.state(&task).await.unwrap(), NetworkState::Ready);

    // Both metadata indices resolve.
    let by_name = Network::load(&task, &service, "n1").await.unwrap();
    let by_id = Network::load(&task, &service, &by_name.id()).await.unwrap();
    assert_eq!(by_id.name(), "n1");

    // Without a VIP, routing falls back to the primary gateway.
    assert_eq!(
        network.default_route_ip(&task).await.unwrap(),
        "192.168.0.1"
    );
    assert_eq!(network.endpoint_ip(&task).await.unwrap(), "203.0.113.1");

    // The three remaining phases ran on the gateway, in order.
    assert_eq!(
        runner.phases_for("gw-n1"),
        vec![Phase::HwGa, Phase::SysFix, Phase::Final]
    );

    let projection = network.to_protocol(&task).await.unwrap();
    assert_eq!(projection.name, "n1");
    assert_eq!(projection.cidr, "192.168.0.0/24");
    assert!(!projection.failover);
    assert!(projection.virtual_ip.is_none());
    assert!(!projection.gateway_id.is_empty());
    assert!(projection.secondary_gateway_id.is_empty());
}

#[tokio::test(start_paused = true)]
async fn high_availability_creates_two_gateways_and_a_vip() {
    let (driver, runner, service) = harness();
    let task = Task::new();
    let network = Network::new(&service);

    network
        .create(
            &task,
            request("n1", "192.168.0.0/24", true),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");

    assert_eq!(driver.host_names(), vec!["gw-n1", "gw2-n1"]);
    assert_eq!(driver.vip_count(), 1);
    assert_eq!(network.state(&task).await.unwrap(), NetworkState::Ready);

    // With a VIP, routing goes through it.
    assert_eq!(
        network.default_route_ip(&task).await.unwrap(),
        "192.168.0.254"
    );
    assert_eq!(network.endpoint_ip(&task).await.unwrap(), "203.0.113.254");

    for gateway in ["gw-n1", "gw2-n1"] {
        assert_eq!(
            runner.phases_for(gateway),
            vec![Phase::HwGa, Phase::SysFix, Phase::Final],
            "{gateway}"
        );
    }

    let projection = network.to_protocol(&task).await.unwrap();
    assert!(projection.failover);
    assert!(projection.virtual_ip.is_some());
    assert!(!projection.secondary_gateway_id.is_empty());
}

#[tokio::test(start_paused = true)]
async fn ha_without_provider_support_degrades_to_single_gateway() {
    let (driver, _runner, service) = harness();
    driver.set_private_virtual_ip(false);
    let task = Task::new();
    let network = Network::new(&service);

    network
        .create(
            &task,
            request("n1", "192.168.0.0/24", true),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");

    assert_eq!(driver.host_names(), vec!["gw-n1"]);
    assert_eq!(driver.vip_count(), 0);
    assert_eq!(network.state(&task).await.unwrap(), NetworkState::Ready);

    let failure = network.gateway(&task, false).await.unwrap_err();
    assert!(failure.is(FailureKind::NotFound));
    assert_eq!(failure.message(), "no secondary gateway ID found");
}

#[tokio::test(start_paused = true)]
async fn secondary_gateway_failure_rolls_everything_back() {
    let (driver, _runner, service) = harness();
    driver.fail_host_creation("gw2-n1");
    let task = Task::new();
    let network = Network::new(&service);

    let failure = network
        .create(
            &task,
            request("n1", "192.168.0.0/24", true),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.message(), "failed to create gateway 'gw2-n1'");

    // Primary gateway, VIP, provider network and metadata are all gone.
    assert!(driver.host_names().is_empty());
    assert_eq!(driver.vip_count(), 0);
    assert_eq!(driver.network_count(), 0);
    let load_failure = Network::load(&task, &service, "n1").await.unwrap_err();
    assert!(load_failure.is(FailureKind::NotFound));
}

#[tokio::test(start_paused = true)]
async fn keep_on_failure_preserves_partial_resources() {
    let (driver, _runner, service) = harness();
    driver.fail_host_creation("gw2-n1");
    let task = Task::new();
    let network = Network::new(&service);

    let mut creation = request("n1", "192.168.0.0/24", true);
    creation.keep_on_failure = true;
    let failure = network
        .create(&task, creation, None, sizing(2, 4.0, 40))
        .await
        .unwrap_err();
    assert_eq!(failure.message(), "failed to create gateway 'gw2-n1'");

    // Everything created before the failure is still there for forensics.
    assert_eq!(driver.host_names(), vec!["gw-n1"]);
    assert_eq!(driver.vip_count(), 1);
    assert_eq!(driver.network_count(), 1);
    assert!(Network::load(&task, &service, "n1").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn routable_cidr_is_rejected_without_side_effects() {
    let (driver, _runner, service) = harness();
    let task = Task::new();
    let network = Network::new(&service);

    let failure = network
        .create(
            &task,
            request("n1", "8.8.8.0/24", false),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .unwrap_err();

    assert!(failure.is(FailureKind::InvalidRequest));
    assert_eq!(driver.network_count(), 0);
    assert!(driver.host_names().is_empty());
    assert_eq!(driver.delete_network_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_names_are_rejected() {
    let (_driver, _runner, service) = harness();
    let task = Task::new();

    let first = Network::new(&service);
    first
        .create(
            &task,
            request("n1", "192.168.0.0/24", false),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");

    let second = Network::new(&service);
    let failure = second
        .create(
            &task,
            request("n1", "192.168.1.0/24", false),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .unwrap_err();
    assert!(failure.is(FailureKind::Duplicate));
}

#[tokio::test(start_paused = true)]
async fn delete_refuses_while_hosts_are_attached() {
    let (driver, _runner, service) = harness();
    let task = Task::new();
    let network = Network::new(&service);

    network
        .create(
            &task,
            request("n1", "192.168.0.0/24", false),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");
    let deletions_after_create = driver.delete_network_calls();

    let host = attachable_host(&task, &service, "h1", &network.id()).await;
    network.attach_host(&task, &host).await.unwrap();

    let failure = network.delete(&task).await.unwrap_err();
    assert!(failure.is(FailureKind::NotAvailable));
    assert_eq!(
        failure.message(),
        "cannot delete network 'n1': 1 host is still attached to it: h1"
    );
    assert_eq!(driver.delete_network_calls(), deletions_after_create);

    // Detached, the deletion goes through.
    network.detach_host(&task, &host.id()).await.unwrap();
    network.delete(&task).await.unwrap();
    assert_eq!(driver.network_count(), 0);
    let load_failure = Network::load(&task, &service, "n1").await.unwrap_err();
    assert!(load_failure.is(FailureKind::NotFound));
}

#[tokio::test(start_paused = true)]
async fn delete_survives_provider_deletion_timeouts() {
    let (driver, _runner, service) = harness();
    let task = Task::new();
    let network = Network::new(&service);

    network
        .create(
            &task,
            request("n1", "192.168.0.0/24", false),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");

    // The provider answers with a timeout although the deletion landed; the
    // core polls until the network is observably gone.
    driver.timeout_network_deletions();
    network.delete(&task).await.unwrap();
    assert_eq!(driver.network_count(), 0);
    let load_failure = Network::load(&task, &service, "n1").await.unwrap_err();
    assert!(load_failure.is(FailureKind::NotFound));
}

#[tokio::test(start_paused = true)]
async fn attach_is_idempotent_and_detach_of_stranger_is_a_noop() {
    let (_driver, _runner, service) = harness();
    let task = Task::new();
    let network = Network::new(&service);

    network
        .create(
            &task,
            request("n1", "192.168.0.0/24", false),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");

    let host = attachable_host(&task, &service, "h1", &network.id()).await;
    network.attach_host(&task, &host).await.unwrap();
    network.attach_host(&task, &host).await.unwrap();
    assert_eq!(network.list_hosts(&task).await.unwrap().len(), 1);

    network.detach_host(&task, "not-an-id").await.unwrap();
    assert_eq!(network.list_hosts(&task).await.unwrap().len(), 1);

    network.detach_host(&task, &host.id()).await.unwrap();
    assert!(network.list_hosts(&task).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_attach_and_detach_lose_no_updates() {
    let (_driver, _runner, service) = harness();
    let task = Task::new();
    let network = Network::new(&service);

    network
        .create(
            &task,
            request("n1", "192.168.0.0/24", false),
            None,
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");

    let mut hosts = Vec::new();
    for index in 0..10 {
        hosts.push(attachable_host(&task, &service, &format!("h{index}"), &network.id()).await);
    }

    let mut attaches = Vec::new();
    for host in &hosts {
        let network = network.clone();
        let host = host.clone();
        attaches.push(tokio::spawn(async move {
            let task = Task::new();
            network.attach_host(&task, &host).await.unwrap();
        }));
    }
    for attach in attaches {
        attach.await.unwrap();
    }
    assert_eq!(network.list_hosts(&task).await.unwrap().len(), 10);

    let mut detaches = Vec::new();
    for host in &hosts {
        let network = network.clone();
        let host_id = host.id();
        detaches.push(tokio::spawn(async move {
            let task = Task::new();
            network.detach_host(&task, &host_id).await.unwrap();
        }));
    }
    for detach in detaches {
        detach.await.unwrap();
    }
    assert!(network.list_hosts(&task).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn explicit_gateway_name_is_honoured_without_failover() {
    let (driver, _runner, service) = harness();
    let task = Task::new();
    let network = Network::new(&service);

    network
        .create(
            &task,
            request("n1", "192.168.0.0/24", false),
            Some("edge-router".to_string()),
            sizing(2, 4.0, 40),
        )
        .await
        .expect("network creation");

    assert_eq!(driver.host_names(), vec!["edge-router"]);
    let gateway = network.gateway(&task, true).await.unwrap();
    assert_eq!(gateway.name(), "edge-router");
}

#[tokio::test(start_paused = true)]
async fn browse_visits_every_network() {
    let (_driver, _runner, service) = harness();
    let task = Task::new();

    for name in ["n1", "n2"] {
        let network = Network::new(&service);
        network
            .create(
                &task,
                request(name, "192.168.0.0/24", false),
                None,
                sizing(2, 4.0, 40),
            )
            .await
            .expect("network creation");
    }

    let browser = Network::new(&service);
    let mut seen = Vec::new();
    browser
        .browse(&task, |network| {
            seen.push(network.name.clone());
            Ok(())
        })
        .await
        .unwrap();
    seen.sort();
    assert_eq!(seen, vec!["n1", "n2"]);
}
