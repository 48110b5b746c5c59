//! Network load balancers
//!
//! KT Cloud NLBs know nothing about VPCs, so the VPC an NLB was created for
//! is kept in the registry under the NLB id. The listener and the VM group
//! must use the same protocol and port.
//!
//! CreateNLB runs as a saga:
//!
//! ```text
//! create-nlb ─▶ add-nlb-vm (per VM) ─▶ store-nlb ─▶ describe-nlb
//!     │              │
//!     ▼              ▼
//!  delete     remove member
//! ```
//!
//! AddVMs is a saga of `add-nlb-vm` steps, so a VM that cannot join takes
//! the ones added before it out again.

use crate::api::{AddNlbVmRequest, CreateNlbRequest, Nlb, NlbVm, RuleFilter};
use crate::context::KtContext;
use crate::lookup::{NlbLookup, VmLookup};
use crate::mapper::{self, VmEnrichment};
use crate::vpc;
use async_trait::async_trait;
use cloudplug_core::model::{NlbHealthInfo, NlbInfo, NlbRequest};
use cloudplug_core::{
    CloudError, Compensation, Iid, Lookup, NlbHandler, ResourceKind, ResourceRef, Resolver, Result,
    Saga, TypedRegistry, ensure_absent,
};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const NAMESPACE: &str = "nlb";

pub const NLB_OPTION: &str = "roundrobin";
/// Target of `http` and `https` health checks
pub const HEALTH_CHECK_URL: &str = "abc.kt.com";

/// Registry record of an NLB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNlb {
    pub vpc: String,
}

/// A VM about to join an NLB
#[derive(Debug, Clone)]
struct Member {
    vm: Iid,
    public_ip: String,
}

fn delete_nlb(ctx: Arc<KtContext>, nlb_id: String) -> Compensation {
    async move {
        ctx.call(ResourceKind::Nlb, &nlb_id, "deleteNLB", ctx.api.delete_nlb(&nlb_id))
            .await
            .map(|_| ())
    }
    .boxed()
}

fn remove_member(ctx: Arc<KtContext>, service_id: String) -> Compensation {
    async move {
        ctx.call(ResourceKind::Nlb, &service_id, "removeNLBVM", ctx.api.remove_nlb_vm(&service_id))
            .await
            .map(|_| ())
    }
    .boxed()
}

/// Checks the request shape and returns the health check type to create.
fn health_check_type(request: &NlbRequest) -> Result<String> {
    let invalid = |reason: &str| CloudError::validation(ResourceKind::Nlb, reason);
    if request.name.trim().is_empty() {
        return Err(invalid("name is required"));
    }
    if request.vpc.is_empty() {
        return Err(invalid("vpc is required"));
    }
    let listener = &request.listener;
    if listener.protocol.is_empty() || listener.port.is_empty() {
        return Err(invalid("listener protocol and port are required"));
    }
    if !listener.protocol.eq_ignore_ascii_case(&request.vm_group.protocol) {
        return Err(invalid("listener and VM group must use the same protocol"));
    }
    if listener.port != request.vm_group.port {
        return Err(invalid("listener and VM group must use the same port"));
    }
    let protocol = match request.health_checker.protocol.as_str() {
        "" => &listener.protocol,
        p => p,
    };
    Ok(protocol.to_ascii_uppercase())
}

pub struct KtNlbHandler {
    ctx: Arc<KtContext>,
}

impl KtNlbHandler {
    pub fn new(ctx: Arc<KtContext>) -> Self {
        Self { ctx }
    }

    async fn stored(&self, nlb_id: &str) -> Result<Option<StoredNlb>> {
        let namespace = self.ctx.namespace(NAMESPACE);
        TypedRegistry::new(self.ctx.registry.as_ref(), &namespace).get(nlb_id).await
    }

    async fn resolve(&self, nlb: &ResourceRef) -> Result<Nlb> {
        Ok(Resolver::new()
            .resolve(&NlbLookup(&self.ctx), &self.ctx.scope, nlb)
            .await?
            .resource)
    }

    async fn members_of(&self, nlb_id: &str) -> Result<Vec<NlbVm>> {
        let ctx = &self.ctx;
        ctx.call(ResourceKind::Nlb, nlb_id, "listNLBVMs", ctx.api.list_nlb_vms(nlb_id))
            .await
    }

    async fn vm_names(&self) -> Result<HashMap<String, String>> {
        let lookup = VmLookup(&self.ctx);
        Ok(lookup
            .list(&self.ctx.scope)
            .await?
            .iter()
            .map(|vm| {
                let iid = lookup.iid_of(vm);
                (iid.system_id, iid.name_id)
            })
            .collect())
    }

    async fn describe(&self, nlb: &Nlb, vm_names: &HashMap<String, String>) -> Result<NlbInfo> {
        let nlb_id = nlb.nlbid.as_deref().unwrap_or_default();
        let members = self.members_of(nlb_id).await?;
        let stored = self.stored(nlb_id).await?;
        Ok(mapper::map_nlb(nlb, &members, vm_names, stored.as_ref().map(|s| s.vpc.as_str())))
    }

    async fn describe_by_id(&self, nlb_id: &str) -> Result<NlbInfo> {
        let nlb = NlbLookup(&self.ctx)
            .fetch_by_id(&self.ctx.scope, nlb_id)
            .await?
            .ok_or_else(|| CloudError::not_found(ResourceKind::Nlb, nlb_id))?;
        self.describe(&nlb, &self.vm_names().await?).await
    }

    /// Resolves every VM and its public IP before anything is changed.
    async fn members(&self, vms: &[ResourceRef]) -> Result<Vec<Member>> {
        let ctx = &self.ctx;
        let iids = Resolver::new()
            .resolve_all(&VmLookup(ctx), &ctx.scope, vms)
            .await?;
        if iids.is_empty() {
            return Ok(Vec::new());
        }
        let enrichment = VmEnrichment {
            port_forwarding: ctx
                .call(
                    ResourceKind::PortForwardingRule,
                    "",
                    "listPortForwardingRules",
                    ctx.api.list_port_forwarding_rules(&RuleFilter::default()),
                )
                .await?,
            tags: Vec::new(),
        };
        iids.into_iter()
            .map(|vm| {
                let public_ip = enrichment.public_ip(&vm.system_id).map(str::to_string).ok_or_else(|| {
                    CloudError::validation(ResourceKind::Nlb, format!("VM '{}' has no public IP", vm.name_id))
                })?;
                Ok(Member { vm, public_ip })
            })
            .collect()
    }

    async fn join(&self, saga: &mut Saga, nlb_id: &str, port: &str, members: &[Member]) -> Result<()> {
        let ctx = &self.ctx;
        for member in members {
            let request = AddNlbVmRequest {
                nlb_id: nlb_id.to_string(),
                vm_id: member.vm.system_id.clone(),
                ip_address: member.public_ip.clone(),
                public_port: port.to_string(),
            };
            saga.execute_with_undo(
                "add-nlb-vm",
                ctx.call(ResourceKind::Nlb, nlb_id, "addNLBVM", ctx.api.add_nlb_vm(&request)),
                |added: &NlbVm| remove_member(Arc::clone(&self.ctx), added.serviceid.clone().unwrap_or_default()),
            )
            .await?;
            tracing::debug!(nlb_id, vm = %member.vm.name_id, "VM added to NLB");
        }
        Ok(())
    }

    async fn create(&self, request: NlbRequest) -> Result<NlbInfo> {
        let ctx = &self.ctx;
        let health_check = health_check_type(&request)?;
        let vpc = vpc::load_vpc(ctx, &request.vpc).await?;
        ensure_absent(&NlbLookup(ctx), &ctx.scope, &request.name).await?;
        let members = self.members(&request.vm_group.vms).await?;

        let create = CreateNlbRequest {
            name: request.name.clone(),
            zone_id: ctx.zone_id().to_string(),
            nlb_option: NLB_OPTION.to_string(),
            service_ip: String::new(),
            service_port: request.listener.port.clone(),
            service_type: request.listener.protocol.to_ascii_uppercase(),
            health_check_type: health_check,
            health_check_url: HEALTH_CHECK_URL.to_string(),
        };

        let mut saga = Saga::new("create-nlb").with_cancellation(ctx.cancel.clone());
        let nlb_id = saga
            .execute_with_undo(
                "create-nlb",
                ctx.call(ResourceKind::Nlb, &request.name, "createNLB", ctx.api.create_nlb(&create)),
                |id: &String| delete_nlb(Arc::clone(&self.ctx), id.clone()),
            )
            .await?;
        tracing::info!(name = %request.name, nlb_id = %nlb_id, "NLB created");

        self.join(&mut saga, &nlb_id, &request.listener.port, &members).await?;

        let namespace = ctx.namespace(NAMESPACE);
        let record = StoredNlb { vpc: vpc.name };
        saga.execute(
            "store-nlb",
            TypedRegistry::new(ctx.registry.as_ref(), &namespace).put(&nlb_id, &record),
        )
        .await?;

        let info = saga.execute("describe-nlb", self.describe_by_id(&nlb_id)).await?;
        saga.commit();
        Ok(info)
    }

    async fn delete(&self, nlb: &ResourceRef) -> Result<bool> {
        let ctx = &self.ctx;
        let found = self.resolve(nlb).await?;
        let nlb_id = found.nlbid.unwrap_or_default();
        let deleted = ctx
            .call(ResourceKind::Nlb, &nlb_id, "deleteNLB", ctx.api.delete_nlb(&nlb_id))
            .await?;
        if !deleted {
            return Err(CloudError::provider(ResourceKind::Nlb, &nlb_id, "deleteNLB", "NLB was not deleted"));
        }
        ctx.registry.delete(&ctx.namespace(NAMESPACE), &nlb_id).await?;
        tracing::info!(nlb_id = %nlb_id, "NLB deleted");
        Ok(true)
    }

    async fn add(&self, nlb: &ResourceRef, vms: &[ResourceRef]) -> Result<NlbInfo> {
        if vms.is_empty() {
            return Err(CloudError::validation(ResourceKind::Nlb, "no VMs to add"));
        }
        let found = self.resolve(nlb).await?;
        let nlb_id = found.nlbid.clone().unwrap_or_default();
        let port = found.serviceport.clone().unwrap_or_default();
        let members = self.members(vms).await?;

        let mut saga = Saga::new("add-nlb-vms").with_cancellation(self.ctx.cancel.clone());
        self.join(&mut saga, &nlb_id, &port, &members).await?;
        saga.commit();
        self.describe(&found, &self.vm_names().await?).await
    }

    async fn remove(&self, nlb: &ResourceRef, vms: &[ResourceRef]) -> Result<bool> {
        let ctx = &self.ctx;
        if vms.is_empty() {
            return Err(CloudError::validation(ResourceKind::Nlb, "no VMs to remove"));
        }
        let found = self.resolve(nlb).await?;
        let nlb_id = found.nlbid.unwrap_or_default();
        let iids = Resolver::new().resolve_all(&VmLookup(ctx), &ctx.scope, vms).await?;
        let members = self.members_of(&nlb_id).await?;

        let mut service_ids = Vec::with_capacity(iids.len());
        for vm in &iids {
            let service_id = members
                .iter()
                .find(|m| m.vmid.as_deref() == Some(vm.system_id.as_str()))
                .and_then(|m| m.serviceid.clone())
                .ok_or_else(|| {
                    CloudError::not_found(ResourceKind::Vm, format!("{} in NLB {}", vm.name_id, nlb_id))
                })?;
            service_ids.push(service_id);
        }
        for service_id in &service_ids {
            ctx.call(ResourceKind::Nlb, &nlb_id, "removeNLBVM", ctx.api.remove_nlb_vm(service_id))
                .await?;
        }
        Ok(true)
    }

    async fn health(&self, nlb: &ResourceRef) -> Result<NlbHealthInfo> {
        let found = self.resolve(nlb).await?;
        let members = self.members_of(found.nlbid.as_deref().unwrap_or_default()).await?;
        Ok(mapper::nlb_health(&members, &self.vm_names().await?))
    }
}

#[async_trait]
impl NlbHandler for KtNlbHandler {
    async fn create_nlb(&self, request: NlbRequest) -> Result<NlbInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Nlb, &request.name, "CreateNLB");
        timer.finish(self.create(request).await)
    }

    async fn list_nlb(&self) -> Result<Vec<NlbInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Nlb, "", "ListNLB");
        let result = async {
            let nlbs = NlbLookup(&self.ctx).list(&self.ctx.scope).await?;
            let vm_names = self.vm_names().await?;
            let mut out = Vec::with_capacity(nlbs.len());
            for nlb in &nlbs {
                out.push(self.describe(nlb, &vm_names).await?);
            }
            Ok(out)
        }
        .await;
        timer.finish(result)
    }

    async fn get_nlb(&self, nlb: &ResourceRef) -> Result<NlbInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Nlb, nlb.label(), "GetNLB");
        let result = async {
            let found = self.resolve(nlb).await?;
            self.describe(&found, &self.vm_names().await?).await
        }
        .await;
        timer.finish(result)
    }

    async fn delete_nlb(&self, nlb: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Nlb, nlb.label(), "DeleteNLB");
        timer.finish(self.delete(nlb).await)
    }

    async fn add_vms(&self, nlb: &ResourceRef, vms: &[ResourceRef]) -> Result<NlbInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Nlb, nlb.label(), "AddVMs");
        timer.finish(self.add(nlb, vms).await)
    }

    async fn remove_vms(&self, nlb: &ResourceRef, vms: &[ResourceRef]) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Nlb, nlb.label(), "RemoveVMs");
        timer.finish(self.remove(nlb, vms).await)
    }

    async fn get_vm_group_health(&self, nlb: &ResourceRef) -> Result<NlbHealthInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Nlb, nlb.label(), "GetVMGroupHealthInfo");
        timer.finish(self.health(nlb).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::VirtualMachine;
    use crate::error::KtApiError;
    use crate::fake::FakeKtCloud;
    use crate::vpc::KtVpcHandler;
    use cloudplug_core::model::{ListenerInfo, VmGroupRequest, VpcRequest};
    use cloudplug_core::{Scope, VpcHandler};

    fn vm(id: &str, name: &str) -> VirtualMachine {
        VirtualMachine {
            id: Some(id.into()),
            name: Some(name.into()),
            state: Some("Running".into()),
            zoneid: Some("kr-0".into()),
            ..Default::default()
        }
    }

    fn fake() -> FakeKtCloud {
        FakeKtCloud::seeded()
            .with_vm(vm("vm-1", "web-1"))
            .with_vm(vm("vm-2", "web-2"))
            .with_vm(vm("vm-3", "web-3"))
            .with_vm(vm("vm-9", "no-ip"))
    }

    /// Gives `vm_id` a public IP the way StartVM does.
    async fn expose(fake: &FakeKtCloud, vm_id: &str) {
        use crate::api::{AssociateIpRequest, KtCloudApi, PortForwardingRequest};
        let ip = fake.associate_ip_address(&AssociateIpRequest::default()).await.unwrap();
        fake.create_port_forwarding_rule(&PortForwardingRequest {
            ip_address_id: ip.id.unwrap(),
            protocol: "TCP".into(),
            public_port: "22".into(),
            public_end_port: "22".into(),
            private_port: "22".into(),
            private_end_port: "22".into(),
            virtual_machine_id: vm_id.into(),
            open_firewall: false,
        })
        .await
        .unwrap();
    }

    async fn setup(fake: FakeKtCloud) -> (FakeKtCloud, KtNlbHandler) {
        for id in ["vm-1", "vm-2", "vm-3"] {
            expose(&fake, id).await;
        }
        let ctx = Arc::new(KtContext::new(Arc::new(fake.clone()), Scope::zone("KR", "kr-0")).unwrap());
        KtVpcHandler::new(Arc::clone(&ctx))
            .create_vpc(VpcRequest {
                name: "vpc-a".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        (fake, KtNlbHandler::new(ctx))
    }

    fn request(vms: &[&str]) -> NlbRequest {
        NlbRequest {
            name: "web-lb".into(),
            vpc: ResourceRef::by_name("vpc-a"),
            listener: ListenerInfo {
                protocol: "tcp".into(),
                port: "80".into(),
                ..Default::default()
            },
            vm_group: VmGroupRequest {
                protocol: "TCP".into(),
                port: "80".into(),
                vms: vms.iter().map(|n| ResourceRef::by_name(*n)).collect(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_nlb_with_members() {
        let (fake, h) = setup(fake()).await;
        let info = h.create_nlb(request(&["web-1", "web-2"])).await.unwrap();

        assert_eq!(info.iid.name_id, "web-lb");
        assert_eq!(info.vpc, Iid::new("vpc-a", "vpc-a"));
        assert_eq!(info.listener.protocol, "TCP");
        assert_eq!(info.health_checker.protocol, "TCP");
        assert_eq!(info.vms, vec![Iid::new("web-1", "vm-1"), Iid::new("web-2", "vm-2")]);

        let nlb = &fake.nlbs()[0];
        assert_eq!(nlb.nlboption.as_deref(), Some(NLB_OPTION));
        assert_eq!(nlb.healthcheckurl.as_deref(), Some(HEALTH_CHECK_URL));
        let members = fake.nlb_vms();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.publicport.as_deref() == Some("80")));
        assert!(members.iter().all(|m| m.ipaddress.as_deref().is_some_and(|ip| ip.starts_with("211."))));
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_listener() {
        let (fake, h) = setup(fake()).await;
        let mut bad = request(&[]);
        bad.vm_group.port = "8080".into();
        let err = h.create_nlb(bad).await.unwrap_err();
        assert!(matches!(err, CloudError::Validation { .. }));

        let mut bad = request(&[]);
        bad.vm_group.protocol = "UDP".into();
        assert!(h.create_nlb(bad).await.is_err());
        assert_eq!(fake.call_count("createNLB"), 0);
    }

    #[tokio::test]
    async fn test_create_requires_known_vpc() {
        let (fake, h) = setup(fake()).await;
        let mut bad = request(&[]);
        bad.vpc = ResourceRef::by_name("vpc-x");
        let err = h.create_nlb(bad).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fake.call_count("createNLB"), 0);
    }

    #[tokio::test]
    async fn test_vm_without_public_ip_is_rejected_up_front() {
        let (fake, h) = setup(fake()).await;
        let err = h.create_nlb(request(&["web-1", "no-ip"])).await.unwrap_err();
        assert!(matches!(err, CloudError::Validation { .. }));
        assert_eq!(fake.call_count("createNLB"), 0);
    }

    #[tokio::test]
    async fn test_failed_member_rolls_back_create() {
        let failing = fake().fail_on("addNLBVM:vm-2", KtApiError::Transport("reset".into()));
        let (fake, h) = setup(failing).await;

        let err = h.create_nlb(request(&["web-1", "web-2"])).await.unwrap_err();
        match &err {
            CloudError::SagaFailed { step, rolled_back, .. } => {
                assert_eq!(step, "add-nlb-vm");
                assert_eq!(rolled_back, &vec!["add-nlb-vm".to_string(), "create-nlb".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fake.call_count("removeNLBVM"), 1);
        assert_eq!(fake.call_count("deleteNLB"), 1);
        assert!(fake.nlbs().is_empty());
        assert!(fake.nlb_vms().is_empty());
    }

    #[tokio::test]
    async fn test_add_vms_is_all_or_nothing() {
        let failing = fake().fail_on("addNLBVM:vm-3", KtApiError::Transport("reset".into()));
        let (fake, h) = setup(failing).await;
        h.create_nlb(request(&["web-1"])).await.unwrap();
        let nlb = ResourceRef::by_name("web-lb");

        let err = h
            .add_vms(&nlb, &[ResourceRef::by_name("web-2"), ResourceRef::by_name("web-3")])
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::SagaFailed { .. }));
        assert!(err.rollback_warnings().is_empty());

        let members: Vec<_> = fake.nlb_vms().into_iter().filter_map(|m| m.vmid).collect();
        assert_eq!(members, vec!["vm-1".to_string()]);
        assert_eq!(fake.nlbs().len(), 1);
    }

    #[tokio::test]
    async fn test_add_and_remove_vms() {
        let (fake, h) = setup(fake()).await;
        h.create_nlb(request(&["web-1"])).await.unwrap();
        let nlb = ResourceRef::by_name("web-lb");

        let info = h.add_vms(&nlb, &[ResourceRef::by_id("vm-2")]).await.unwrap();
        assert_eq!(info.vms.len(), 2);

        assert!(h.remove_vms(&nlb, &[ResourceRef::by_name("web-1")]).await.unwrap());
        let info = h.get_nlb(&nlb).await.unwrap();
        assert_eq!(info.vms, vec![Iid::new("web-2", "vm-2")]);

        let err = h.remove_vms(&nlb, &[ResourceRef::by_name("web-3")]).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fake.nlb_vms().len(), 1);
    }

    #[tokio::test]
    async fn test_vm_group_health() {
        let (fake, h) = setup(fake()).await;
        h.create_nlb(request(&["web-1", "web-2"])).await.unwrap();
        fake.set_nlb_vm_state("vm-2", "DOWN");

        let health = h.get_vm_group_health(&ResourceRef::by_name("web-lb")).await.unwrap();
        assert_eq!(health.all_vms.len(), 2);
        assert_eq!(health.healthy_vms, vec![Iid::new("web-1", "vm-1")]);
        assert_eq!(health.unhealthy_vms, vec![Iid::new("web-2", "vm-2")]);
    }

    #[tokio::test]
    async fn test_delete_nlb_drops_record() {
        let (fake, h) = setup(fake()).await;
        let info = h.create_nlb(request(&["web-1"])).await.unwrap();
        assert_eq!(h.list_nlb().await.unwrap().len(), 1);

        assert!(h.delete_nlb(&ResourceRef::by_id(&info.iid.system_id)).await.unwrap());
        assert!(fake.nlbs().is_empty());
        assert!(h.stored(&info.iid.system_id).await.unwrap().is_none());

        let err = h.get_nlb(&ResourceRef::by_name("web-lb")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let (_fake, h) = setup(fake()).await;
        h.create_nlb(request(&[])).await.unwrap();
        let err = h.create_nlb(request(&[])).await.unwrap_err();
        assert!(matches!(err, CloudError::AlreadyExists { .. }));
    }

    #[test]
    fn test_health_check_defaults_to_listener() {
        assert_eq!(health_check_type(&request(&[])).unwrap(), "TCP");
        let mut http = request(&[]);
        http.health_checker.protocol = "http".into();
        assert_eq!(health_check_type(&http).unwrap(), "HTTP");
    }
}
