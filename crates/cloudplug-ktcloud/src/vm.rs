//! VM lifecycle
//!
//! StartVM runs as a saga:
//!
//! ```text
//! deploy-vm ─▶ wait-deploy-job ─▶ wait-vm-running ─▶ associate-public-ip
//!     │                                                     │
//!     ▼                                                     ▼
//!  destroy                                  create-port-forwarding-rule /
//!                                           create-firewall-rule (per rule)
//!                                                           │
//!                                                           ▼
//!                                               tag-vm ─▶ describe-vm
//! ```
//!
//! Everything that can be checked without creating anything (request
//! shape, security groups and their rules, name collision, spec) is checked
//! before the first step.

use crate::api::{DeployVmRequest, JobHandle, PublicIp, PublicIpFilter, RuleFilter, TagArg, USER_VM, VirtualMachine};
use crate::context::KtContext;
use crate::lookup::{KtDependencies, VmLookup};
use crate::mapper::{self, TAG_PUBLIC_IP, TAG_SECURITY_GROUPS, TAG_SPEC, TAG_SUBNET, TAG_VPC, VmEnrichment};
use crate::network::{self, NetworkRule, USAGE_PLAN};
use crate::polling::{wait_for_cleanup_job, wait_for_job};
use crate::security;
use crate::spec::VmSpec;
use crate::tag;
use async_trait::async_trait;
use base64::Engine as _;
use cloudplug_core::model::{SecurityRule, VmInfo, VmRequest, VmStatus, VmStatusInfo};
use cloudplug_core::{
    CloudError, Compensation, DependencyGatherer, GatherPolicy, Lookup, PollConfig, PollableOperation,
    ResourceKind, ResourceRef, Resolver, Result, Saga, VmHandler, ensure_absent,
};
use futures_util::FutureExt;
use std::sync::Arc;
use tera::{Context, Tera};

/// KT Cloud attaches VMs to the zone network, so only the key pair is
/// mandatory besides image and spec.
const GATHER_POLICY: GatherPolicy = GatherPolicy {
    require_key_pair: true,
    require_vpc: false,
    require_subnet: false,
};

/// cloud-init user data rendered with `username`.
pub const CLOUD_INIT: &str = r#"#cloud-config
users:
  - default
  - name: {{ username }}
    groups: sudo
    shell: /bin/bash
    sudo: ['ALL=(ALL) NOPASSWD:ALL']
runcmd:
  - mkdir -p /home/{{ username }}/.ssh
  - cp /root/.ssh/authorized_keys /home/{{ username }}/.ssh/authorized_keys
  - chown -R {{ username }}:{{ username }} /home/{{ username }}/.ssh
  - chmod 700 /home/{{ username }}/.ssh
  - chmod 600 /home/{{ username }}/.ssh/authorized_keys
"#;

/// Base64 encoded cloud-init for `vm_user`.
pub fn user_data(vm_user: &str) -> Result<String> {
    let mut context = Context::new();
    context.insert("username", vm_user);
    let script = Tera::one_off(CLOUD_INIT, &context, false)
        .map_err(|e| CloudError::validation(ResourceKind::Vm, format!("cannot render user data: {}", e)))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(script))
}

fn destroy_vm(ctx: Arc<KtContext>, vm_id: String) -> Compensation {
    async move {
        let handle = ctx
            .call(ResourceKind::Vm, &vm_id, "destroyVirtualMachine", ctx.api.destroy_virtual_machine(&vm_id))
            .await?;
        wait_for_cleanup_job(&ctx, ResourceKind::Vm, &vm_id, &handle, ctx.presets.async_job).await
    }
    .boxed()
}

fn release_ip(ctx: Arc<KtContext>, ip: &PublicIp) -> Compensation {
    let ip_id = ip.id.clone().unwrap_or_default();
    async move { network::disassociate_public_ip(&ctx, &ip_id).await }.boxed()
}

fn revoke(ctx: Arc<KtContext>, rule: NetworkRule, rule_id: String) -> Compensation {
    async move { network::revoke_rule(&ctx, &rule, &rule_id).await }.boxed()
}

fn untag(ctx: Arc<KtContext>, vm_id: String, tags: Vec<TagArg>) -> Compensation {
    async move { tag::delete_tags(&ctx, USER_VM, &vm_id, tags).await }.boxed()
}

pub struct KtVmHandler {
    ctx: Arc<KtContext>,
}

impl KtVmHandler {
    pub fn new(ctx: Arc<KtContext>) -> Self {
        Self { ctx }
    }

    async fn resolve(&self, vm: &ResourceRef) -> Result<VirtualMachine> {
        Ok(Resolver::new()
            .resolve(&VmLookup(&self.ctx), &self.ctx.scope, vm)
            .await?
            .resource)
    }

    async fn fetch(&self, vm_id: &str) -> Result<VirtualMachine> {
        VmLookup(&self.ctx)
            .fetch_by_id(&self.ctx.scope, vm_id)
            .await?
            .ok_or_else(|| CloudError::not_found(ResourceKind::Vm, vm_id))
    }

    async fn state_of(&self, vm_id: &str) -> Result<String> {
        Ok(self.fetch(vm_id).await?.state.unwrap_or_default())
    }

    async fn wait_for_state(&self, vm_id: &str, config: PollConfig, wanted: &str) -> Result<()> {
        let op = PollableOperation::new(ResourceKind::Vm, vm_id, config)
            .succeeds_on(&[wanted])
            .fails_on(&["error", "destroyed", "expunging"]);
        self.ctx
            .poller()
            .wait_for_status(&op, || self.state_of(vm_id))
            .await?;
        Ok(())
    }

    async fn enrichment(&self, vm_id: Option<&str>) -> Result<VmEnrichment> {
        let ctx = &self.ctx;
        let mut port_forwarding = ctx
            .call(
                ResourceKind::PortForwardingRule,
                vm_id.unwrap_or_default(),
                "listPortForwardingRules",
                ctx.api.list_port_forwarding_rules(&RuleFilter::default()),
            )
            .await?;
        if let Some(id) = vm_id {
            port_forwarding.retain(|r| r.virtualmachineid.as_deref() == Some(id));
        }
        let tags = tag::vm_tags(ctx, vm_id).await?;
        Ok(VmEnrichment { port_forwarding, tags })
    }

    fn map(&self, vm: &VirtualMachine, enrichment: &VmEnrichment) -> VmInfo {
        mapper::map_vm(vm, enrichment, &self.ctx.scope.region, &self.ctx.vm_user)
    }

    async fn describe(&self, vm_id: &str) -> Result<VmInfo> {
        let vm = self.fetch(vm_id).await?;
        let enrichment = self.enrichment(Some(vm_id)).await?;
        Ok(self.map(&vm, &enrichment))
    }

    /// Inbound rules of every requested group, checked and converted.
    async fn planned_rules(&self, groups: &[ResourceRef]) -> Result<Vec<NetworkRule>> {
        let mut rules: Vec<SecurityRule> = Vec::new();
        for group in groups {
            let (stored, _) = security::load_group(&self.ctx, group).await?;
            if stored.rules.is_empty() {
                return Err(CloudError::validation(
                    ResourceKind::SecurityGroup,
                    format!("security group '{}' has no rules", stored.name),
                ));
            }
            for rule in stored.rules {
                if !rules.contains(&rule) {
                    rules.push(rule);
                }
            }
        }
        network::plan_rules(&rules)
    }

    async fn start(&self, request: VmRequest) -> Result<VmInfo> {
        let ctx = &self.ctx;
        let gatherer = DependencyGatherer::new(GATHER_POLICY);
        gatherer.validate(&request)?;

        let planned = self.planned_rules(&request.security_groups).await?;
        ensure_absent(&VmLookup(ctx), &ctx.scope, &request.name).await?;

        let deps = gatherer.gather(&KtDependencies(ctx), &ctx.scope, &request).await?;
        let spec: VmSpec = deps.spec.parse()?;

        let deploy = DeployVmRequest {
            zone_id: ctx.zone_id().to_string(),
            service_offering_id: spec.service_offering_id.clone(),
            template_id: deps.image.system_id.clone(),
            disk_offering_id: spec.disk_offering_id.clone(),
            display_name: request.name.clone(),
            host_name: request.name.clone(),
            usage_plan_type: USAGE_PLAN.to_string(),
            key_pair: deps.key_pair.as_ref().map(|k| k.system_id.clone()).unwrap_or_default(),
            user_data: Some(user_data(&ctx.vm_user)?),
        };

        let mut saga = Saga::new("start-vm").with_cancellation(ctx.cancel.clone());

        let (vm_id, job): (String, JobHandle) = saga
            .execute_with_undo(
                "deploy-vm",
                async {
                    let handle = ctx
                        .call(ResourceKind::Vm, &request.name, "deployVirtualMachine", ctx.api.deploy_virtual_machine(&deploy))
                        .await?;
                    let vm_id = handle.id.clone().filter(|id| !id.is_empty()).ok_or_else(|| {
                        CloudError::provider(ResourceKind::Vm, &request.name, "deployVirtualMachine", "no VM id returned")
                    })?;
                    Ok((vm_id, handle))
                },
                |(vm_id, _): &(String, JobHandle)| destroy_vm(Arc::clone(&self.ctx), vm_id.clone()),
            )
            .await?;
        tracing::info!(name = %request.name, vm_id = %vm_id, "VM deployed");

        saga.execute(
            "wait-deploy-job",
            wait_for_job(ctx, ResourceKind::Vm, &vm_id, &job, ctx.presets.async_job),
        )
        .await?;

        saga.execute(
            "wait-vm-running",
            self.wait_for_state(&vm_id, ctx.presets.vm_boot, "running"),
        )
        .await?;

        let ip = saga
            .execute_with_undo(
                "associate-public-ip",
                network::associate_public_ip(ctx, &request.name),
                |ip| release_ip(Arc::clone(&self.ctx), ip),
            )
            .await?;
        let ip_id = ip.id.clone().unwrap_or_default();

        for rule in &planned {
            let step = match rule {
                NetworkRule::PortForwarding { .. } => "create-port-forwarding-rule",
                NetworkRule::IcmpFirewall { .. } => "create-firewall-rule",
            };
            saga.execute_with_undo(
                step,
                network::apply_rule(ctx, &ip_id, &vm_id, rule),
                |rule_id| revoke(Arc::clone(&self.ctx), rule.clone(), rule_id.clone()),
            )
            .await?;
        }

        let security_groups: Vec<&str> = deps.security_groups.iter().map(|g| g.system_id.as_str()).collect();
        let mut tags = vec![
            TagArg::new(TAG_VPC, deps.vpc.as_ref().map(|v| v.name_id.clone()).unwrap_or_default()),
            TagArg::new(TAG_SUBNET, deps.subnet.as_ref().map(|s| s.name_id.clone()).unwrap_or_default()),
            TagArg::new(TAG_SECURITY_GROUPS, security_groups.join(",")),
            TagArg::new(TAG_PUBLIC_IP, &ip_id),
            TagArg::new(TAG_SPEC, &deps.spec),
        ];
        tags.extend(request.tags.iter().map(|kv| TagArg::new(&kv.key, &kv.value)));
        tags.retain(|t| !t.value.is_empty());

        saga.execute_with_undo(
            "tag-vm",
            tag::create_tags(ctx, USER_VM, &vm_id, tags.clone()),
            |_| untag(Arc::clone(&self.ctx), vm_id.clone(), tags.clone()),
        )
        .await?;

        let info = saga.execute("describe-vm", self.describe(&vm_id)).await?;
        saga.commit();
        tracing::info!(name = %request.name, vm_id = %vm_id, public_ip = %info.public_ip, "VM started");
        Ok(info)
    }

    async fn stop(&self, vm_id: &str) -> Result<()> {
        let ctx = &self.ctx;
        let handle = ctx
            .call(ResourceKind::Vm, vm_id, "stopVirtualMachine", ctx.api.stop_virtual_machine(vm_id))
            .await?;
        wait_for_job(ctx, ResourceKind::Vm, vm_id, &handle, ctx.presets.async_job).await?;
        self.wait_for_state(vm_id, ctx.presets.vm_power, "stopped").await
    }

    async fn suspend(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let found = self.resolve(vm).await?;
        let vm_id = found.id.clone().unwrap_or_default();
        match current_status(&found) {
            VmStatus::Running => {
                self.stop(&vm_id).await?;
                Ok(VmStatus::Suspended)
            }
            status => Err(wrong_state(vm, "suspended", status)),
        }
    }

    async fn resume(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let ctx = &self.ctx;
        let found = self.resolve(vm).await?;
        let vm_id = found.id.clone().unwrap_or_default();
        match current_status(&found) {
            VmStatus::Suspended => {
                let handle = ctx
                    .call(ResourceKind::Vm, &vm_id, "startVirtualMachine", ctx.api.start_virtual_machine(&vm_id))
                    .await?;
                wait_for_job(ctx, ResourceKind::Vm, &vm_id, &handle, ctx.presets.async_job).await?;
                self.wait_for_state(&vm_id, ctx.presets.vm_power, "running").await?;
                Ok(VmStatus::Running)
            }
            status => Err(wrong_state(vm, "resumed", status)),
        }
    }

    async fn reboot(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let ctx = &self.ctx;
        let found = self.resolve(vm).await?;
        let vm_id = found.id.clone().unwrap_or_default();
        match current_status(&found) {
            VmStatus::Running => {
                let handle = ctx
                    .call(ResourceKind::Vm, &vm_id, "rebootVirtualMachine", ctx.api.reboot_virtual_machine(&vm_id))
                    .await?;
                wait_for_job(ctx, ResourceKind::Vm, &vm_id, &handle, ctx.presets.async_job).await?;
                self.wait_for_state(&vm_id, ctx.presets.vm_power, "running").await?;
                Ok(VmStatus::Running)
            }
            status => Err(wrong_state(vm, "rebooted", status)),
        }
    }

    /// Releases the public IP of a VM together with its rules.
    async fn release_public_ip(&self, vm_id: &str) -> Result<()> {
        let ctx = &self.ctx;
        let enrichment = self.enrichment(Some(vm_id)).await?;
        if let Some(address) = enrichment.public_ip(vm_id) {
            return network::release_public_address(ctx, address).await;
        }

        let Some(ip_id) = enrichment.tag(TAG_PUBLIC_IP) else {
            tracing::debug!(vm_id, "VM has no public IP");
            return Ok(());
        };
        let filter = PublicIpFilter {
            id: Some(ip_id.to_string()),
            ..Default::default()
        };
        let still_allocated = ctx
            .call(ResourceKind::PublicIp, ip_id, "listPublicIpAddresses", ctx.api.list_public_ip_addresses(&filter))
            .await?
            .iter()
            .any(|ip| ip.id.as_deref() == Some(ip_id));
        if still_allocated {
            network::release_public_ip(ctx, ip_id).await?;
        }
        Ok(())
    }

    async fn terminate(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let ctx = &self.ctx;
        let found = self.resolve(vm).await?;
        let vm_id = found.id.clone().unwrap_or_default();

        match current_status(&found) {
            VmStatus::Running => {
                tracing::info!(vm_id = %vm_id, "stopping VM before termination");
                self.stop(&vm_id).await?;
            }
            VmStatus::Suspended => {}
            status => {
                return Err(CloudError::validation(
                    ResourceKind::Vm,
                    format!(
                        "VM '{}' is {}; only a running or suspended VM can be terminated",
                        vm.label(),
                        status
                    ),
                ));
            }
        }

        self.release_public_ip(&vm_id).await?;

        let handle = ctx
            .call(ResourceKind::Vm, &vm_id, "destroyVirtualMachine", ctx.api.destroy_virtual_machine(&vm_id))
            .await?;
        wait_for_job(ctx, ResourceKind::Vm, &vm_id, &handle, ctx.presets.async_job).await?;
        tracing::info!(vm_id = %vm_id, "VM destroyed");
        Ok(VmStatus::Terminating)
    }
}

fn current_status(vm: &VirtualMachine) -> VmStatus {
    mapper::vm_status(vm.state.as_deref().unwrap_or_default())
}

fn wrong_state(vm: &ResourceRef, action: &str, status: VmStatus) -> CloudError {
    CloudError::validation(
        ResourceKind::Vm,
        format!("VM '{}' is {} and cannot be {}", vm.label(), status, action),
    )
}

#[async_trait]
impl VmHandler for KtVmHandler {
    async fn start_vm(&self, request: VmRequest) -> Result<VmInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, &request.name, "StartVM");
        timer.finish(self.start(request).await)
    }

    async fn suspend_vm(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, vm.label(), "SuspendVM");
        timer.finish(self.suspend(vm).await)
    }

    async fn resume_vm(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, vm.label(), "ResumeVM");
        timer.finish(self.resume(vm).await)
    }

    async fn reboot_vm(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, vm.label(), "RebootVM");
        timer.finish(self.reboot(vm).await)
    }

    async fn terminate_vm(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, vm.label(), "TerminateVM");
        timer.finish(self.terminate(vm).await)
    }

    async fn list_vm_status(&self) -> Result<Vec<VmStatusInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, "", "ListVMStatus");
        let lookup = VmLookup(&self.ctx);
        let result = lookup.list(&self.ctx.scope).await.map(|vms| {
            vms.iter()
                .map(|vm| VmStatusInfo {
                    iid: lookup.iid_of(vm),
                    status: current_status(vm),
                })
                .collect()
        });
        timer.finish(result)
    }

    async fn get_vm_status(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, vm.label(), "GetVMStatus");
        let status = self.resolve(vm).await.map(|found| current_status(&found));
        timer.finish(status)
    }

    async fn list_vm(&self) -> Result<Vec<VmInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, "", "ListVM");
        let result = async {
            let vms = VmLookup(&self.ctx).list(&self.ctx.scope).await?;
            if vms.is_empty() {
                return Ok(Vec::new());
            }
            // one listing of rules and tags for the whole zone
            let all = self.enrichment(None).await?;
            Ok(vms
                .iter()
                .map(|vm| {
                    let id = vm.id.as_deref().unwrap_or_default();
                    let enrichment = VmEnrichment {
                        port_forwarding: all
                            .port_forwarding
                            .iter()
                            .filter(|r| r.virtualmachineid.as_deref() == Some(id))
                            .cloned()
                            .collect(),
                        tags: all
                            .tags
                            .iter()
                            .filter(|t| t.resourceid.as_deref() == Some(id))
                            .cloned()
                            .collect(),
                    };
                    self.map(vm, &enrichment)
                })
                .collect())
        }
        .await;
        timer.finish(result)
    }

    async fn get_vm(&self, vm: &ResourceRef) -> Result<VmInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, vm.label(), "GetVM");
        let result = async {
            let found = self.resolve(vm).await?;
            let vm_id = found.id.clone().unwrap_or_default();
            let enrichment = self.enrichment(Some(&vm_id)).await?;
            Ok(self.map(&found, &enrichment))
        }
        .await;
        timer.finish(result)
    }
}
