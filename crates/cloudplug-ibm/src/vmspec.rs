//! VM specs are the active presets of the public server package that can
//! be ordered in the connection's datacenter.

use crate::api::Preset;
use crate::catalog;
use crate::context::IbmContext;
use crate::mapper;
use async_trait::async_trait;
use cloudplug_core::model::VmSpecInfo;
use cloudplug_core::{CloudError, ResourceKind, Result, VmSpecHandler};
use std::sync::Arc;

pub struct IbmVmSpecHandler {
    ctx: Arc<IbmContext>,
}

impl IbmVmSpecHandler {
    pub fn new(ctx: Arc<IbmContext>) -> Self {
        Self { ctx }
    }

    async fn presets(&self) -> Result<Vec<Preset>> {
        let ctx = &self.ctx;
        let package_id = catalog::public_package(ctx).await?;
        Ok(ctx
            .call(
                ResourceKind::VmSpec,
                "",
                "getActivePresets",
                ctx.api.list_active_presets(package_id),
            )
            .await?
            .into_iter()
            .filter(|p| mapper::offered_in(p, ctx.datacenter()))
            .collect())
    }

    async fn list(&self) -> Result<Vec<VmSpecInfo>> {
        let region = &self.ctx.scope.region;
        Ok(self
            .presets()
            .await?
            .iter()
            .map(|p| mapper::map_vm_spec(p, region))
            .collect())
    }

    async fn get(&self, name: &str) -> Result<VmSpecInfo> {
        if name.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::VmSpec, "spec name is required"));
        }
        self.presets()
            .await?
            .iter()
            .find(|p| p.key_name.as_deref() == Some(name))
            .map(|p| mapper::map_vm_spec(p, &self.ctx.scope.region))
            .ok_or_else(|| CloudError::not_found(ResourceKind::VmSpec, name))
    }
}

#[async_trait]
impl VmSpecHandler for IbmVmSpecHandler {
    async fn list_vm_spec(&self) -> Result<Vec<VmSpecInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::VmSpec, "", "ListVMSpec");
        timer.finish(self.list().await)
    }

    async fn get_vm_spec(&self, name: &str) -> Result<VmSpecInfo> {
        let timer = self.ctx.calls.start(ResourceKind::VmSpec, name, "GetVMSpec");
        timer.finish(self.get(name).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSoftLayer;
    use cloudplug_core::Scope;

    fn handler(fake: FakeSoftLayer) -> IbmVmSpecHandler {
        let ctx = IbmContext::new(Arc::new(fake), Scope::region("dal10")).unwrap();
        IbmVmSpecHandler::new(Arc::new(ctx))
    }

    #[tokio::test]
    async fn test_list_skips_presets_of_other_datacenters() {
        let fake = FakeSoftLayer::seeded()
            .with_preset(901, "B1_2X4X25", 2, 4)
            .with_preset(902, "C1_4X4X25", 4, 4)
            .with_preset_locations(902, &["tok02"]);
        let specs = handler(fake).list_vm_spec().await.unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["B1_1X2X25", "B1_2X4X25"]);
        assert_eq!(specs[1].vcpu.count, "2");
        assert_eq!(specs[1].vcpu.clock, "2.0");
        assert_eq!(specs[1].mem_mb, "4096");
        assert!(specs.iter().all(|s| s.region == "dal10"));
    }

    #[tokio::test]
    async fn test_get_gpu_preset() {
        let fake = FakeSoftLayer::seeded()
            .with_preset(903, "AC1_8X60X25", 8, 60)
            .with_preset_gpu(903, "P100", 1);
        let h = handler(fake);
        let spec = h.get_vm_spec("AC1_8X60X25").await.unwrap();
        assert_eq!(spec.gpus.len(), 1);
        assert_eq!(spec.gpus[0].model, "P100");
        assert_eq!(spec.gpus[0].count, "1");

        assert!(h.get_vm_spec("AC1_16X120X25").await.unwrap_err().is_not_found());
        assert!(matches!(
            h.get_vm_spec(" ").await.unwrap_err(),
            CloudError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn test_preset_restricted_elsewhere_is_not_found() {
        let fake = FakeSoftLayer::seeded()
            .with_preset(902, "C1_4X4X25", 4, 4)
            .with_preset_locations(902, &["tok02"]);
        let err = handler(fake).get_vm_spec("C1_4X4X25").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
