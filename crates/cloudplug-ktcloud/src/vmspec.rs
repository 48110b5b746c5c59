//! VM specs
//!
//! The catalog is every service offering, alone and combined with each disk
//! offering, named the way [`VmSpec`] prints it.

use crate::context::KtContext;
use crate::mapper;
use crate::spec::VmSpec;
use async_trait::async_trait;
use cloudplug_core::model::VmSpecInfo;
use cloudplug_core::{CloudError, ResourceKind, Result, VmSpecHandler};
use std::sync::Arc;

pub struct KtVmSpecHandler {
    ctx: Arc<KtContext>,
}

impl KtVmSpecHandler {
    pub fn new(ctx: Arc<KtContext>) -> Self {
        Self { ctx }
    }

    async fn catalog(&self) -> Result<Vec<VmSpecInfo>> {
        let ctx = &self.ctx;
        let zone = ctx.zone_id();
        let offerings = ctx
            .call(ResourceKind::VmSpec, "", "listServiceOfferings", ctx.api.list_service_offerings(zone))
            .await?;
        let disks = ctx
            .call(ResourceKind::VmSpec, "", "listDiskOfferings", ctx.api.list_disk_offerings(zone))
            .await?;

        let region = &ctx.scope.region;
        let mut specs = Vec::with_capacity(offerings.len() * (disks.len() + 1));
        for offering in &offerings {
            specs.push(mapper::map_vm_spec(offering, None, region, zone));
            specs.extend(
                disks
                    .iter()
                    .map(|disk| mapper::map_vm_spec(offering, Some(disk), region, zone)),
            );
        }
        Ok(specs)
    }

    async fn find(&self, name: &str) -> Result<VmSpecInfo> {
        let wanted = name.parse::<VmSpec>()?.to_string();
        self.catalog()
            .await?
            .into_iter()
            .find(|spec| spec.name == wanted)
            .ok_or_else(|| CloudError::not_found(ResourceKind::VmSpec, name))
    }
}

#[async_trait]
impl VmSpecHandler for KtVmSpecHandler {
    async fn list_vm_spec(&self) -> Result<Vec<VmSpecInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::VmSpec, "", "ListVMSpec");
        timer.finish(self.catalog().await)
    }

    async fn get_vm_spec(&self, name: &str) -> Result<VmSpecInfo> {
        let timer = self.ctx.calls.start(ResourceKind::VmSpec, name, "GetVMSpec");
        timer.finish(self.find(name).await)
    }
}
