//! Virtual guest lifecycle
//!
//! StartVM resolves everything up front (request, name collision,
//! dependencies, catalog prices, preset, user data) and then runs a short
//! saga:
//!
//! ```text
//! place-order ─▶ wait-vm-active ─▶ describe-vm
//!      │
//!      ▼
//!  delete guest
//! ```

use crate::api::{
    Account, NetworkVlan, OrderGuest, OrderNetworkComponent, ProductItem, ProductOrder, VirtualGuest,
};
use crate::catalog;
use crate::context::{IbmContext, parse_id};
use crate::error::ApiResult;
use crate::lookup::{GuestLookup, IbmDependencies, SshKeyLookup, SubnetLookup};
use crate::mapper::{self, GuestDetail};
use async_trait::async_trait;
use cloudplug_core::model::{VmInfo, VmRequest, VmStatus, VmStatusInfo};
use cloudplug_core::{
    CloudError, Compensation, DependencyGatherer, GatherPolicy, GatheredDependencies, Lookup,
    PollableOperation, ResourceKind, ResourceRef, Resolver, Result, Saga, VmHandler, ensure_absent,
};
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tera::{Context, Tera};

/// Guests land on the datacenter's default VLANs unless told otherwise.
const GATHER_POLICY: GatherPolicy = GatherPolicy {
    require_key_pair: true,
    require_vpc: false,
    require_subnet: false,
};

/// `status:powerState` of a guest that is ready
const READY: &str = "ACTIVE:Running";

/// cloud-init user data rendered with `username` and `public_key`.
pub const CLOUD_INIT: &str = r#"#cloud-config
users:
  - default
  - name: {{ username }}
    groups: sudo
    shell: /bin/bash
    sudo: ['ALL=(ALL) NOPASSWD:ALL']
    ssh_authorized_keys:
      - {{ public_key }}
"#;

pub fn user_data(vm_user: &str, public_key: &str) -> Result<String> {
    let mut context = Context::new();
    context.insert("username", vm_user);
    context.insert("public_key", public_key.trim());
    Tera::one_off(CLOUD_INIT, &context, false)
        .map_err(|e| CloudError::validation(ResourceKind::Vm, format!("cannot render user data: {}", e)))
}

/// Domain new guests are created in, derived from the account holder.
pub fn guest_domain(account: &Account) -> String {
    match (account.first_name.as_deref(), account.last_name.as_deref()) {
        (Some(first), Some(last)) => format!("{}-{}.cloudplug.cloud", first, last)
            .to_ascii_lowercase()
            .replace(' ', "-"),
        _ => "cloudplug.cloud".to_string(),
    }
}

fn delete_guest(ctx: Arc<IbmContext>, guest_id: i64) -> Compensation {
    async move {
        ctx.call(
            ResourceKind::Vm,
            &guest_id.to_string(),
            "deleteObject",
            ctx.api.delete_virtual_guest(guest_id),
        )
        .await?;
        Ok(())
    }
    .boxed()
}

pub struct IbmVmHandler {
    ctx: Arc<IbmContext>,
}

impl IbmVmHandler {
    pub fn new(ctx: Arc<IbmContext>) -> Self {
        Self { ctx }
    }

    async fn resolve(&self, vm: &ResourceRef) -> Result<VirtualGuest> {
        Ok(Resolver::new()
            .resolve(&GuestLookup(&self.ctx), &self.ctx.scope, vm)
            .await?
            .resource)
    }

    async fn fetch(&self, guest_id: i64) -> Result<VirtualGuest> {
        let target = guest_id.to_string();
        self.ctx
            .call_optional(ResourceKind::Vm, &target, "getObject", self.ctx.api.get_virtual_guest(guest_id))
            .await?
            .ok_or_else(|| CloudError::not_found(ResourceKind::Vm, target))
    }

    async fn provision_status(&self, guest_id: i64) -> Result<String> {
        let guest = self.fetch(guest_id).await?;
        Ok(format!("{}:{}", mapper::guest_status(&guest), mapper::power_state(&guest)))
    }

    /// VLANs and OS items needed to describe guests of this datacenter.
    async fn detail_source(&self) -> Result<(Vec<NetworkVlan>, Vec<ProductItem>)> {
        let ctx = &self.ctx;
        let vlans = ctx
            .call(ResourceKind::Vpc, "", "getNetworkVlans", ctx.api.list_network_vlans(ctx.datacenter()))
            .await?;
        let images = catalog::os_images(ctx).await?;
        Ok((vlans, images))
    }

    fn map(&self, guest: &VirtualGuest, vlans: &[NetworkVlan], images: &[ProductItem]) -> VmInfo {
        let vlan_id = guest
            .frontend_network_components
            .first()
            .and_then(|nic| nic.network_vlan_id);
        let detail = GuestDetail {
            vlan: vlan_id.and_then(|id| vlans.iter().find(|v| v.id == Some(id)).cloned()),
            image: images.iter().find(|i| mapper::runs_image(guest, i)).cloned(),
        };
        mapper::map_vm(guest, &detail, &self.ctx.scope.region, &self.ctx.vm_user)
    }

    async fn describe(&self, guest_id: i64) -> Result<VmInfo> {
        let guest = self.fetch(guest_id).await?;
        let (vlans, images) = self.detail_source().await?;
        Ok(self.map(&guest, &vlans, &images))
    }

    /// Public network component of the order. A subnet without free
    /// addresses is left out and SoftLayer picks one.
    async fn public_network(&self, deps: &GatheredDependencies) -> Result<Option<OrderNetworkComponent>> {
        let ctx = &self.ctx;
        let security_group_ids = deps
            .security_groups
            .iter()
            .map(|g| parse_id(ResourceKind::SecurityGroup, &g.system_id))
            .collect::<Result<Vec<_>>>()?;

        let Some(vpc) = &deps.vpc else {
            if security_group_ids.is_empty() {
                return Ok(None);
            }
            return Ok(Some(OrderNetworkComponent {
                network_vlan_id: None,
                primary_subnet_id: None,
                security_group_ids,
            }));
        };
        let vlan_id = parse_id(ResourceKind::Vpc, &vpc.system_id)?;

        let mut primary_subnet_id = None;
        if let Some(subnet) = &deps.subnet {
            let lookup = SubnetLookup { ctx, vlan_id };
            let found = lookup
                .fetch_by_id(&ctx.scope, &subnet.system_id)
                .await?
                .ok_or_else(|| CloudError::not_found(ResourceKind::Subnet, &subnet.system_id))?;
            let usable = found.usable_ip_address_count.unwrap_or(0);
            let used = found.virtual_guest_count.unwrap_or(0);
            if usable > used {
                primary_subnet_id = found.id;
            } else {
                tracing::warn!(subnet = %subnet.name_id, "subnet has no free addresses, letting SoftLayer choose");
            }
        }

        Ok(Some(OrderNetworkComponent {
            network_vlan_id: Some(vlan_id),
            primary_subnet_id,
            security_group_ids,
        }))
    }

    async fn build_order(&self, request: &VmRequest, deps: &GatheredDependencies) -> Result<ProductOrder> {
        let ctx = &self.ctx;
        let key = deps
            .key_pair
            .as_ref()
            .ok_or_else(|| CloudError::validation(ResourceKind::KeyPair, "a key pair is required"))?;
        let ssh_key = SshKeyLookup(ctx)
            .fetch_by_id(&ctx.scope, &key.system_id)
            .await?
            .ok_or_else(|| CloudError::not_found(ResourceKind::KeyPair, &key.system_id))?;

        let account = ctx
            .call(ResourceKind::Order, &request.name, "getAccount", ctx.api.get_account())
            .await?;
        let package_id = catalog::public_package(ctx).await?;
        let items = catalog::items(ctx, package_id).await?;
        let prices = catalog::order_prices(&items, &deps.image.name_id)?;
        let preset = catalog::find_preset(ctx, package_id, &deps.spec).await?;
        let datacenter = catalog::datacenter(ctx).await?;

        Ok(ProductOrder {
            package_id,
            location: datacenter.id.unwrap_or_default().to_string(),
            preset_id: preset.id,
            quantity: 1,
            use_hourly_pricing: true,
            prices,
            virtual_guests: vec![OrderGuest {
                hostname: request.name.clone(),
                domain: guest_domain(&account),
                primary_network_component: self.public_network(deps).await?,
                primary_backend_network_component: None,
            }],
            ssh_key_ids: ssh_key.id.into_iter().collect(),
            user_data: Some(user_data(&ctx.vm_user, ssh_key.key.as_deref().unwrap_or_default())?),
        })
    }

    async fn start(&self, request: VmRequest) -> Result<VmInfo> {
        let ctx = &self.ctx;
        let gatherer = DependencyGatherer::new(GATHER_POLICY);
        gatherer.validate(&request)?;
        ensure_absent(&GuestLookup(ctx), &ctx.scope, &request.name).await?;

        let deps = gatherer.gather(&IbmDependencies(ctx), &ctx.scope, &request).await?;
        let order = self.build_order(&request, &deps).await?;

        let mut saga = Saga::new("start-vm").with_cancellation(ctx.cancel.clone());

        let guest_id: i64 = saga
            .execute_with_undo(
                "place-order",
                async {
                    let receipt = ctx
                        .call(ResourceKind::Order, &request.name, "placeOrder", ctx.api.place_order(&order))
                        .await?;
                    receipt.placed_guest_ids.first().copied().ok_or_else(|| {
                        CloudError::provider(ResourceKind::Order, &request.name, "placeOrder", "no guest id returned")
                    })
                },
                |guest_id: &i64| delete_guest(Arc::clone(&self.ctx), *guest_id),
            )
            .await?;
        tracing::info!(name = %request.name, guest_id, "order placed");

        let op = PollableOperation::new(ResourceKind::Vm, guest_id.to_string(), ctx.provision).succeeds_on(&[READY]);
        saga.execute(
            "wait-vm-active",
            ctx.poller().wait_for_status(&op, || self.provision_status(guest_id)),
        )
        .await?;

        let info = saga.execute("describe-vm", self.describe(guest_id)).await?;
        saga.commit();
        tracing::info!(name = %request.name, guest_id, public_ip = %info.public_ip, "VM started");
        Ok(info)
    }

    async fn power<F>(&self, guest_id: i64, api: &str, request: F) -> Result<()>
    where
        F: Future<Output = ApiResult<bool>>,
    {
        self.ctx
            .call(ResourceKind::Vm, &guest_id.to_string(), api, request)
            .await?;
        tracing::info!(guest_id, api, "power request accepted");
        Ok(())
    }

    async fn suspend(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let guest = self.resolve(vm).await?;
        let guest_id = guest.id.unwrap_or_default();
        match power_key(&guest).as_str() {
            "running" => {
                self.power(guest_id, "powerOff", self.ctx.api.power_off(guest_id)).await?;
                Ok(VmStatus::Suspending)
            }
            _ => Err(wrong_state(vm, &guest, "suspended")),
        }
    }

    async fn resume(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let guest = self.resolve(vm).await?;
        let guest_id = guest.id.unwrap_or_default();
        match power_key(&guest).as_str() {
            "halted" => self.power(guest_id, "powerOn", self.ctx.api.power_on(guest_id)).await?,
            "paused" => self.power(guest_id, "resume", self.ctx.api.resume(guest_id)).await?,
            "running" => {
                return Err(CloudError::validation(
                    ResourceKind::Vm,
                    format!("VM '{}' is already running", vm.label()),
                ));
            }
            _ => return Err(wrong_state(vm, &guest, "resumed")),
        }
        Ok(VmStatus::Resuming)
    }

    async fn reboot(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let guest = self.resolve(vm).await?;
        let guest_id = guest.id.unwrap_or_default();
        match power_key(&guest).as_str() {
            "halted" => self.power(guest_id, "powerOn", self.ctx.api.power_on(guest_id)).await?,
            "running" => self.power(guest_id, "powerCycle", self.ctx.api.power_cycle(guest_id)).await?,
            _ => return Err(wrong_state(vm, &guest, "rebooted")),
        }
        Ok(VmStatus::Rebooting)
    }

    async fn terminate(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let ctx = &self.ctx;
        let guest = self.resolve(vm).await?;
        let guest_id = guest.id.unwrap_or_default();
        if power_key(&guest) == "suspended" {
            return Err(wrong_state(vm, &guest, "terminated"));
        }
        ctx.call(
            ResourceKind::Vm,
            &guest_id.to_string(),
            "deleteObject",
            ctx.api.delete_virtual_guest(guest_id),
        )
        .await?;
        tracing::info!(guest_id, "guest deleted");
        Ok(VmStatus::Terminating)
    }
}

fn power_key(guest: &VirtualGuest) -> String {
    mapper::power_state(guest).to_ascii_lowercase()
}

fn current_status(guest: &VirtualGuest) -> VmStatus {
    mapper::vm_status(mapper::power_state(guest))
}

fn wrong_state(vm: &ResourceRef, guest: &VirtualGuest, action: &str) -> CloudError {
    let power = match mapper::power_state(guest) {
        "" => "in an unknown power state",
        other => other,
    };
    CloudError::validation(
        ResourceKind::Vm,
        format!("VM '{}' is {} and cannot be {}", vm.label(), power, action),
    )
}

#[async_trait]
impl VmHandler for IbmVmHandler {
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
        let lookup = GuestLookup(&self.ctx);
        let result = lookup.list(&self.ctx.scope).await.map(|guests| {
            guests
                .iter()
                .map(|guest| VmStatusInfo {
                    iid: lookup.iid_of(guest),
                    status: current_status(guest),
                })
                .collect()
        });
        timer.finish(result)
    }

    async fn get_vm_status(&self, vm: &ResourceRef) -> Result<VmStatus> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, vm.label(), "GetVMStatus");
        let status = self.resolve(vm).await.map(|guest| current_status(&guest));
        timer.finish(status)
    }

    async fn list_vm(&self) -> Result<Vec<VmInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, "", "ListVM");
        let result = async {
            let guests = GuestLookup(&self.ctx).list(&self.ctx.scope).await?;
            if guests.is_empty() {
                return Ok(Vec::new());
            }
            let (vlans, images) = self.detail_source().await?;
            Ok(guests.iter().map(|g| self.map(g, &vlans, &images)).collect())
        }
        .await;
        timer.finish(result)
    }

    async fn get_vm(&self, vm: &ResourceRef) -> Result<VmInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Vm, vm.label(), "GetVM");
        let result = async {
            let guest = self.resolve(vm).await?;
            let (vlans, images) = self.detail_source().await?;
            Ok(self.map(&guest, &vlans, &images))
        }
        .await;
        timer.finish(result)
    }
}
