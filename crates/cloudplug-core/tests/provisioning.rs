//! End-to-end flow over the core pieces: guard, saga, poller, registry

mod common;

use common::{ServerLookup, server};
use cloudplug_core::{
    CloudError, FileRegistry, PollConfig, PollableOperation, Poller, ResourceKind, ResourceRef,
    ResourceRegistry, Resolver, Saga, Scope, ensure_absent,
};
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;

async fn provision(lookup: Arc<ServerLookup>, scope: &Scope, name: &str, fail_last: bool) -> cloudplug_core::Result<String> {
    ensure_absent(lookup.as_ref(), scope, name).await?;

    let mut saga = Saga::new("start-vm");
    let zone = scope.zone.clone().unwrap_or_default();
    let created = saga
        .execute_with_undo(
            "create-server",
            {
                let lookup = lookup.clone();
                async move { Ok(lookup.create(name, &zone)) }
            },
            |s| {
                let lookup = lookup.clone();
                let id = s.id.clone();
                async move {
                    lookup.remove(&id);
                    Ok(())
                }
                .boxed()
            },
        )
        .await?;

    let op = PollableOperation::new(ResourceKind::Vm, &created.id, PollConfig::new(5, Duration::from_secs(1)))
        .succeeds_on(&["running"]);
    saga.execute("wait-running", Poller::new().wait_for_status(&op, || async { Ok("Running".to_string()) }))
        .await?;

    if fail_last {
        saga.execute::<(), _>("open-firewall", async {
            Err(CloudError::provider(ResourceKind::FirewallRule, "web-1", "createFirewallRule", "denied"))
        })
        .await?;
    }

    saga.commit();
    Ok(created.id)
}

#[tokio::test(start_paused = true)]
async fn test_existence_guard_prevents_create() {
    let lookup = Arc::new(ServerLookup::new(vec![server("i-9", "WEB-1", "za")]));
    let err = provision(lookup.clone(), &Scope::zone("r1", "za"), "web-1", false)
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::AlreadyExists { .. }));
    assert_eq!(lookup.creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_created_server_resolves_by_name_and_id() {
    let lookup = Arc::new(ServerLookup::new(vec![]));
    let scope = Scope::zone("r1", "za");
    let id = provision(lookup.clone(), &scope, "web-1", false).await.unwrap();

    let resolver = Resolver::new();
    let by_name = resolver
        .resolve_iid(lookup.as_ref(), &scope, &ResourceRef::by_name("web-1"))
        .await
        .unwrap();
    let by_id = resolver
        .resolve_iid(lookup.as_ref(), &scope, &ResourceRef::by_id(&id))
        .await
        .unwrap();
    assert_eq!(by_name, by_id);
}

#[tokio::test(start_paused = true)]
async fn test_failed_step_removes_created_server() {
    let lookup = Arc::new(ServerLookup::new(vec![]));
    let err = provision(lookup.clone(), &Scope::zone("r1", "za"), "web-1", true)
        .await
        .unwrap_err();

    match &err {
        CloudError::SagaFailed { step, rolled_back, .. } => {
            assert_eq!(step, "open-firewall");
            assert_eq!(rolled_back, &vec!["create-server".to_string()]);
        }
        other => panic!("expected SagaFailed, got {other:?}"),
    }
    assert_eq!(lookup.creates(), 1);
    assert!(lookup.servers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_file_registry_roundtrip_through_trait_object() {
    let temp_dir = tempfile::tempdir().unwrap();
    let registry: Arc<dyn ResourceRegistry> = Arc::new(FileRegistry::new(temp_dir.path()));

    registry
        .put("ktcloud/kr-0/vpc", "vpc-a", serde_json::json!({"cidr": "10.0.0.0/16"}))
        .await
        .unwrap();
    let record = registry.get("ktcloud/kr-0/vpc", "vpc-a").await.unwrap().unwrap();
    assert_eq!(record.value["cidr"], "10.0.0.0/16");
}
