mod common;

use cloudplug_core::model::{DiskRequest, ListenerInfo, NlbRequest, SecurityRule, VmGroupRequest, VpcRequest};
use cloudplug_core::{CancellationToken, CloudDriver, CloudError, PollConfig, ResourceKind, ResourceRef};
use cloudplug_ktcloud::{FakeKtCloud, KtApiError, KtPollPresets};
use common::{connect, connect_with, vm_request};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_firewall_failure_rolls_back_vm() {
    let conn = connect(
        FakeKtCloud::seeded().fail_on("createFirewallRule", KtApiError::Transport("connection reset".into())),
    );
    conn.security_group(
        "sg-web",
        vec![
            SecurityRule::inbound("tcp", "22", "22", ""),
            SecurityRule::inbound("icmp", "-1", "-1", ""),
        ],
    )
    .await;

    let vms = conn.driver.vm_handler().unwrap();
    let err = vms.start_vm(vm_request("web-1", "sg-web")).await.unwrap_err();

    match &err {
        CloudError::SagaFailed { step, rolled_back, .. } => {
            assert_eq!(step, "create-firewall-rule");
            assert_eq!(
                rolled_back,
                &vec![
                    "create-port-forwarding-rule".to_string(),
                    "associate-public-ip".to_string(),
                    "deploy-vm".to_string(),
                ]
            );
        }
        other => panic!("expected saga failure, got {other:?}"),
    }
    assert!(matches!(
        err.root_cause(),
        CloudError::Provider { kind: ResourceKind::FirewallRule, .. }
    ));
    assert!(err.rollback_warnings().is_empty());

    assert_eq!(conn.fake.call_count("destroyVirtualMachine"), 1);
    assert!(conn.fake.vms().is_empty());
    assert!(conn.fake.public_ips().is_empty());
    assert!(conn.fake.port_forwarding_rules().is_empty());

    let failures = conn.calls.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].api, "StartVM");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_booting_destroys_vm_cleanly() {
    let token = CancellationToken::new();
    let conn = connect_with(FakeKtCloud::seeded().with_boot_reads(1000), |ctx| {
        ctx.with_cancellation(token.clone())
    });
    conn.security_group("sg-web", vec![SecurityRule::inbound("tcp", "22", "22", "")])
        .await;

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        canceller.cancel();
    });

    let vms = conn.driver.vm_handler().unwrap();
    let err = vms.start_vm(vm_request("web-1", "sg-web")).await.unwrap_err();

    match &err {
        CloudError::SagaFailed {
            step,
            rolled_back,
            warnings,
            ..
        } => {
            assert_eq!(step, "wait-vm-running");
            assert_eq!(rolled_back, &vec!["deploy-vm".to_string()]);
            assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        }
        other => panic!("expected saga failure, got {other:?}"),
    }
    assert!(matches!(err.root_cause(), CloudError::Cancelled(_)));
    assert_eq!(conn.fake.call_count("destroyVirtualMachine"), 1);
    assert!(conn.fake.vms().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_existing_name_blocks_start() {
    let conn = connect(FakeKtCloud::seeded());
    conn.security_group("sg-web", vec![SecurityRule::inbound("tcp", "22", "22", "")])
        .await;
    let vms = conn.driver.vm_handler().unwrap();
    vms.start_vm(vm_request("web-1", "sg-web")).await.unwrap();

    let err = vms.start_vm(vm_request("WEB-1", "sg-web")).await.unwrap_err();
    assert!(matches!(err, CloudError::AlreadyExists { kind: ResourceKind::Vm, .. }));
    assert_eq!(conn.fake.call_count("deployVirtualMachine"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_started_vm_is_reachable_by_name_and_id() {
    let conn = connect(FakeKtCloud::seeded());
    conn.security_group("sg-web", vec![SecurityRule::inbound("tcp", "80", "80", "")])
        .await;
    let vms = conn.driver.vm_handler().unwrap();
    let started = vms.start_vm(vm_request("web-1", "sg-web")).await.unwrap();

    let by_name = vms.get_vm(&ResourceRef::by_name("web-1")).await.unwrap();
    let by_id = vms.get_vm(&ResourceRef::by_id(&started.iid.system_id)).await.unwrap();
    assert_eq!(by_name.iid, by_id.iid);
    assert_eq!(by_id.public_ip, started.public_ip);
    // root-only spec
    assert_eq!(by_id.root_disk_size, "");
}

#[tokio::test(start_paused = true)]
async fn test_disk_wait_honours_preset_override() {
    let presets = KtPollPresets {
        disk_create: PollConfig::new(5, Duration::from_secs(1)),
        ..Default::default()
    };
    let conn = connect_with(FakeKtCloud::new().with_stuck_volume_state("creating"), |ctx| {
        ctx.with_presets(presets)
    });

    let err = conn
        .driver
        .disk_handler()
        .unwrap()
        .create_disk(DiskRequest {
            name: "data-1".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    match err.root_cause() {
        CloudError::Timeout { attempts, last_status, .. } => {
            assert_eq!(*attempts, 5);
            assert_eq!(last_status.as_deref(), Some("creating"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(conn.fake.call_count("deleteVolume"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_nlb_balances_started_vms() {
    let conn = connect(FakeKtCloud::seeded());
    conn.driver
        .vpc_handler()
        .unwrap()
        .create_vpc(VpcRequest {
            name: "vpc-a".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    conn.security_group("sg-web", vec![SecurityRule::inbound("tcp", "80", "80", "")])
        .await;
    let vms = conn.driver.vm_handler().unwrap();
    let web1 = vms.start_vm(vm_request("web-1", "sg-web")).await.unwrap();
    let web2 = vms.start_vm(vm_request("web-2", "sg-web")).await.unwrap();

    let nlbs = conn.driver.nlb_handler().unwrap();
    let info = nlbs
        .create_nlb(NlbRequest {
            name: "web-lb".into(),
            vpc: ResourceRef::by_name("vpc-a"),
            listener: ListenerInfo {
                protocol: "TCP".into(),
                port: "80".into(),
                ..Default::default()
            },
            vm_group: VmGroupRequest {
                protocol: "TCP".into(),
                port: "80".into(),
                vms: vec![ResourceRef::by_name("web-1"), ResourceRef::by_name("web-2")],
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(info.vms, vec![web1.iid.clone(), web2.iid.clone()]);

    let members = conn.fake.nlb_vms();
    assert_eq!(members[0].ipaddress.as_deref(), Some(web1.public_ip.as_str()));

    let health = nlbs.get_vm_group_health(&ResourceRef::by_name("web-lb")).await.unwrap();
    assert_eq!(health.healthy_vms.len(), 2);
    assert!(
        conn.calls
            .records()
            .iter()
            .any(|r| r.api == "CreateNLB" && r.error.is_none())
    );
}
