//! Block storage volumes

use crate::api::{CreateVolumeRequest, JobHandle, Volume, VolumeFilter};
use crate::context::KtContext;
use crate::lookup::{VmLookup, VolumeLookup};
use crate::mapper::{self, zone_display_name};
use crate::network::USAGE_PLAN;
use crate::polling::wait_for_job;
use async_trait::async_trait;
use cloudplug_core::model::{DiskInfo, DiskRequest, DiskStatus};
use cloudplug_core::{
    CloudError, Compensation, DiskHandler, Lookup, PollableOperation, ResourceKind, ResourceRef,
    Resolver, Result, Saga, ensure_absent,
};
use futures_util::FutureExt;
use std::sync::Arc;

const STG: &str = "STG";
const SSD: &str = "SSD";
const DEFAULT_SIZE: &str = "100";
const SSD_IOPS: &str = "10000";

/// Volume product for a requested type and size, e.g. `STG 100G`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeProduct {
    pub kind: &'static str,
    pub size_gb: u32,
    pub iops: Option<&'static str>,
}

impl VolumeProduct {
    pub fn from_request(disk_type: &str, disk_size: &str, zone: &str) -> Result<Self> {
        let kind = match disk_type.trim().to_ascii_uppercase().as_str() {
            "" | "DEFAULT" | "HDD" | "STG" => STG,
            "SSD" => SSD,
            other => {
                return Err(CloudError::validation(
                    ResourceKind::Disk,
                    format!("disk type '{}' is not supported, use HDD or SSD", other),
                ));
            }
        };
        if kind == SSD && zone_display_name(zone) == "KOR-HA" {
            return Err(CloudError::validation(
                ResourceKind::Disk,
                "the KOR-HA zone does not offer SSD volumes",
            ));
        }

        let size = match disk_size.trim() {
            "" => DEFAULT_SIZE,
            s if s.eq_ignore_ascii_case("default") => DEFAULT_SIZE,
            s => s,
        };
        let size_gb: u32 = size.parse().map_err(|_| {
            CloudError::validation(ResourceKind::Disk, format!("disk size '{}' is not a number", size))
        })?;

        let (min, max) = if kind == SSD { (100, 800) } else { (10, 300) };
        if !(min..=max).contains(&size_gb) {
            return Err(CloudError::validation(
                ResourceKind::Disk,
                format!("{} disk size must be between {} and {} GB, got {}", kind, min, max, size_gb),
            ));
        }

        Ok(Self {
            kind,
            size_gb,
            iops: (kind == SSD).then_some(SSD_IOPS),
        })
    }

    pub fn product_code(&self) -> String {
        format!("{} {}G", self.kind, self.size_gb)
    }
}

fn delete_volume(ctx: Arc<KtContext>, volume_id: String) -> Compensation {
    async move {
        ctx.call(ResourceKind::Disk, &volume_id, "deleteVolume", ctx.api.delete_volume(&volume_id))
            .await
            .map(|_| ())
    }
    .boxed()
}

pub struct KtDiskHandler {
    ctx: Arc<KtContext>,
}

impl KtDiskHandler {
    pub fn new(ctx: Arc<KtContext>) -> Self {
        Self { ctx }
    }

    async fn fetch(&self, disk: &ResourceRef) -> Result<Volume> {
        Ok(Resolver::new()
            .resolve(&VolumeLookup(&self.ctx), &self.ctx.scope, disk)
            .await?
            .resource)
    }

    async fn fetch_by_id(&self, volume_id: &str) -> Result<Volume> {
        self.fetch(&ResourceRef::by_id(volume_id)).await
    }

    async fn volume_state(&self, volume_id: &str) -> Result<String> {
        let filter = VolumeFilter {
            zone_id: self.ctx.zone_id().to_string(),
            id: Some(volume_id.to_string()),
        };
        self.ctx
            .call(ResourceKind::Disk, volume_id, "listVolumes", self.ctx.api.list_volumes(&filter))
            .await?
            .into_iter()
            .find(|v| v.id.as_deref() == Some(volume_id))
            .map(|v| v.state.unwrap_or_default())
            .ok_or_else(|| CloudError::not_found(ResourceKind::Disk, volume_id))
    }

    async fn create(&self, request: DiskRequest) -> Result<DiskInfo> {
        let ctx = &self.ctx;
        if request.name.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::Disk, "name is required"));
        }
        let product = VolumeProduct::from_request(&request.disk_type, &request.disk_size, ctx.zone_id())?;
        ensure_absent(&VolumeLookup(ctx), &ctx.scope, &request.name).await?;

        let create = CreateVolumeRequest {
            name: request.name.clone(),
            zone_id: ctx.zone_id().to_string(),
            usage_plan_type: USAGE_PLAN.to_string(),
            product_code: product.product_code(),
            iops: product.iops.map(str::to_string),
        };
        let mut saga = Saga::new("create-disk").with_cancellation(ctx.cancel.clone());
        let (volume_id, job): (String, JobHandle) = saga
            .execute_with_undo(
                "create-volume",
                async {
                    let handle = ctx
                        .call(ResourceKind::Disk, &request.name, "createVolume", ctx.api.create_volume(&create))
                        .await?;
                    let volume_id = handle.id.clone().filter(|id| !id.is_empty()).ok_or_else(|| {
                        CloudError::provider(ResourceKind::Disk, &request.name, "createVolume", "no volume id returned")
                    })?;
                    Ok((volume_id, handle))
                },
                |(volume_id, _): &(String, JobHandle)| delete_volume(Arc::clone(&self.ctx), volume_id.clone()),
            )
            .await?;

        saga.execute(
            "wait-create-job",
            wait_for_job(ctx, ResourceKind::Disk, &volume_id, &job, ctx.presets.async_job),
        )
        .await?;

        let op = PollableOperation::new(ResourceKind::Disk, &volume_id, ctx.presets.disk_create)
            .succeeds_on(&["allocated", "ready", "attached"])
            .fails_on(&["error*"]);
        saga.execute(
            "wait-volume-ready",
            ctx.poller().wait_for_status(&op, || self.volume_state(&volume_id)),
        )
        .await?;
        saga.commit();

        tracing::info!(name = %request.name, id = %volume_id, product = %product.product_code(), "disk created");
        Ok(mapper::map_disk(&self.fetch_by_id(&volume_id).await?, ctx.zone_id()))
    }

    async fn delete(&self, disk: &ResourceRef) -> Result<bool> {
        let volume = self.fetch(disk).await?;
        let id = volume.id.clone().unwrap_or_default();
        if volume.virtualmachineid.as_deref().is_some_and(|v| !v.is_empty()) {
            return Err(CloudError::validation(
                ResourceKind::Disk,
                format!("disk '{}' is attached; detach it first", disk.label()),
            ));
        }
        self.ctx
            .call(ResourceKind::Disk, &id, "deleteVolume", self.ctx.api.delete_volume(&id))
            .await
    }

    async fn attach(&self, disk: &ResourceRef, vm: &ResourceRef) -> Result<DiskInfo> {
        let ctx = &self.ctx;
        let volume = self.fetch(disk).await?;
        let vm_id = Resolver::new()
            .resolve_iid(&VmLookup(ctx), &ctx.scope, vm)
            .await?
            .system_id;
        let volume_id = volume.id.clone().unwrap_or_default();

        if mapper::disk_status(&volume) == DiskStatus::Attached {
            return Err(CloudError::validation(
                ResourceKind::Disk,
                format!("disk '{}' is already attached", disk.label()),
            ));
        }

        let handle = ctx
            .call(ResourceKind::Disk, &volume_id, "attachVolume", ctx.api.attach_volume(&volume_id, &vm_id))
            .await?;
        wait_for_job(ctx, ResourceKind::Disk, &volume_id, &handle, ctx.presets.disk_attach).await?;
        Ok(mapper::map_disk(&self.fetch_by_id(&volume_id).await?, ctx.zone_id()))
    }

    async fn detach(&self, disk: &ResourceRef, vm: &ResourceRef) -> Result<bool> {
        let ctx = &self.ctx;
        let volume = self.fetch(disk).await?;
        let vm_id = Resolver::new()
            .resolve_iid(&VmLookup(ctx), &ctx.scope, vm)
            .await?
            .system_id;
        let volume_id = volume.id.clone().unwrap_or_default();

        match volume.virtualmachineid.as_deref() {
            Some(owner) if owner == vm_id => {}
            Some(owner) if !owner.is_empty() => {
                return Err(CloudError::validation(
                    ResourceKind::Disk,
                    format!("disk '{}' is attached to another vm ({})", disk.label(), owner),
                ));
            }
            _ => {
                return Err(CloudError::validation(
                    ResourceKind::Disk,
                    format!("disk '{}' is not attached", disk.label()),
                ));
            }
        }
        if mapper::is_bootable(&volume) {
            return Err(CloudError::validation(
                ResourceKind::Disk,
                format!("disk '{}' is a boot disk and cannot be detached", disk.label()),
            ));
        }

        let handle = ctx
            .call(ResourceKind::Disk, &volume_id, "detachVolume", ctx.api.detach_volume(&volume_id))
            .await?;
        wait_for_job(ctx, ResourceKind::Disk, &volume_id, &handle, ctx.presets.disk_attach).await?;
        Ok(true)
    }
}

#[async_trait]
impl DiskHandler for KtDiskHandler {
    async fn create_disk(&self, request: DiskRequest) -> Result<DiskInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Disk, &request.name, "CreateDisk");
        timer.finish(self.create(request).await)
    }

    async fn list_disk(&self) -> Result<Vec<DiskInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Disk, "", "ListDisk");
        let result = async {
            let volumes = VolumeLookup(&self.ctx).list(&self.ctx.scope).await?;
            Ok(volumes
                .iter()
                .map(|v| mapper::map_disk(v, self.ctx.zone_id()))
                .collect())
        }
        .await;
        timer.finish(result)
    }

    async fn get_disk(&self, disk: &ResourceRef) -> Result<DiskInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Disk, disk.label(), "GetDisk");
        let result = async { Ok(mapper::map_disk(&self.fetch(disk).await?, self.ctx.zone_id())) }.await;
        timer.finish(result)
    }

    async fn change_disk_size(&self, disk: &ResourceRef, _size: &str) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Disk, disk.label(), "ChangeDiskSize");
        timer.finish(Err(CloudError::not_supported(ResourceKind::Disk, "change_disk_size")))
    }

    async fn delete_disk(&self, disk: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Disk, disk.label(), "DeleteDisk");
        timer.finish(self.delete(disk).await)
    }

    async fn attach_disk(&self, disk: &ResourceRef, vm: &ResourceRef) -> Result<DiskInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Disk, disk.label(), "AttachDisk");
        timer.finish(self.attach(disk, vm).await)
    }

    async fn detach_disk(&self, disk: &ResourceRef, vm: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Disk, disk.label(), "DetachDisk");
        timer.finish(self.detach(disk, vm).await)
    }
}
