//! NAS file systems
//!
//! A file system is a performance NAS volume, named by its notes. Volumes
//! are not tied to a VLAN; clients reach one through the subnets it allows
//! access from. The VPC a volume was created for is kept in the registry
//! under the volume id.
//!
//! CreateFileSystem runs as a saga:
//!
//! ```text
//! order-file-storage ─▶ wait-file-storage-stable ─▶ allow-access-subnets ─▶ store-file-system ─▶ describe-file-system
//!         │
//!         ▼
//!   delete volume
//! ```

use crate::api::{FileStorage, FileStorageOrder, NetworkVlan, STORAGE_FAILED, STORAGE_STABLE};
use crate::context::{IbmContext, parse_id};
use crate::lookup::{FileStorageLookup, SubnetLookup, VlanLookup, subnet_name};
use crate::mapper::{self, NFS_VERSION};
use async_trait::async_trait;
use cloudplug_core::model::{FileSystemInfo, FileSystemRequest};
use cloudplug_core::{
    CloudError, Compensation, FileSystemHandler, Iid, Lookup, PollableOperation, ResourceKind,
    ResourceRef, Resolver, Result, Saga, TypedRegistry, ensure_absent,
};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;

pub const NAMESPACE: &str = "filesystem";

pub const DEFAULT_IOPS: u32 = 100;
pub const IOPS_RANGE: RangeInclusive<u32> = 100..=1000;
pub const DEFAULT_CAPACITY_GB: u64 = 10;
pub const CAPACITY_RANGE_GB: RangeInclusive<u64> = 10..=32_000;

/// Registry record of a file system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFileSystem {
    pub vpc: Iid,
}

fn delete_storage(ctx: Arc<IbmContext>, storage_id: i64) -> Compensation {
    async move {
        ctx.call(
            ResourceKind::FileSystem,
            &storage_id.to_string(),
            "deleteStorage",
            ctx.api.delete_file_storage(storage_id),
        )
        .await
        .map(|_| ())
    }
    .boxed()
}

/// Checks the request and fills in the defaults.
pub fn storage_order(request: &FileSystemRequest, datacenter: &str) -> Result<FileStorageOrder> {
    let invalid = |reason: String| CloudError::validation(ResourceKind::FileSystem, reason);
    if request.name.trim().is_empty() {
        return Err(invalid("name is required".into()));
    }
    if request.vpc.is_empty() {
        return Err(invalid("vpc is required".into()));
    }
    if !request.nfs_version.is_empty() && request.nfs_version != NFS_VERSION {
        return Err(invalid(format!(
            "NFS version '{}' is not supported, only {}",
            request.nfs_version, NFS_VERSION
        )));
    }
    let iops = request.iops.unwrap_or(DEFAULT_IOPS);
    if !IOPS_RANGE.contains(&iops) {
        return Err(invalid(format!(
            "IOPS must be between {} and {}",
            IOPS_RANGE.start(),
            IOPS_RANGE.end()
        )));
    }
    let capacity_gb = match request.capacity_gb {
        0 => DEFAULT_CAPACITY_GB,
        gb => gb,
    };
    if !CAPACITY_RANGE_GB.contains(&capacity_gb) {
        return Err(invalid(format!(
            "capacity must be between {} and {} GB",
            CAPACITY_RANGE_GB.start(),
            CAPACITY_RANGE_GB.end()
        )));
    }
    Ok(FileStorageOrder {
        name: request.name.clone(),
        location: datacenter.to_string(),
        capacity_gb,
        iops,
        nfs_version: NFS_VERSION.to_string(),
    })
}

pub struct IbmFileSystemHandler {
    ctx: Arc<IbmContext>,
}

impl IbmFileSystemHandler {
    pub fn new(ctx: Arc<IbmContext>) -> Self {
        Self { ctx }
    }

    async fn stored(&self, storage_id: i64) -> Result<Option<StoredFileSystem>> {
        let namespace = self.ctx.namespace(NAMESPACE);
        TypedRegistry::new(self.ctx.registry.as_ref(), &namespace)
            .get(&storage_id.to_string())
            .await
    }

    async fn resolve(&self, fs: &ResourceRef) -> Result<FileStorage> {
        Ok(Resolver::new()
            .resolve(&FileStorageLookup(&self.ctx), &self.ctx.scope, fs)
            .await?
            .resource)
    }

    async fn fetch(&self, storage_id: i64) -> Result<FileStorage> {
        let target = storage_id.to_string();
        FileStorageLookup(&self.ctx)
            .fetch_by_id(&self.ctx.scope, &target)
            .await?
            .ok_or_else(|| CloudError::not_found(ResourceKind::FileSystem, target))
    }

    async fn lifecycle(&self, storage_id: i64) -> Result<String> {
        let storage = self.fetch(storage_id).await?;
        Ok(storage.lifecycle_state.unwrap_or_default())
    }

    async fn vlans(&self) -> Result<Vec<NetworkVlan>> {
        VlanLookup(&self.ctx).list(&self.ctx.scope).await
    }

    async fn describe(&self, storage: &FileStorage, vlans: &[NetworkVlan]) -> Result<FileSystemInfo> {
        let mut info = mapper::map_file_system(storage, vlans, &self.ctx.scope.region);
        if let Some(stored) = self.stored(storage.id.unwrap_or_default()).await? {
            info.vpc = stored.vpc;
        }
        Ok(info)
    }

    async fn describe_by_id(&self, storage_id: i64) -> Result<FileSystemInfo> {
        let storage = self.fetch(storage_id).await?;
        self.describe(&storage, &self.vlans().await?).await
    }

    /// VLAN a volume belongs to: the recorded VPC, else the VLAN of its
    /// first allowed subnet.
    async fn vlan_of(&self, storage: &FileStorage) -> Result<i64> {
        if let Some(stored) = self.stored(storage.id.unwrap_or_default()).await? {
            return parse_id(ResourceKind::Vpc, &stored.vpc.system_id);
        }
        storage
            .allowed_subnets
            .iter()
            .find_map(|s| s.network_vlan_id)
            .ok_or_else(|| {
                CloudError::validation(
                    ResourceKind::FileSystem,
                    format!("file system '{}' is not attached to a VPC", mapper::storage_name(storage)),
                )
            })
    }

    /// Subnet ids to allow access from. No subnets means the first subnet
    /// of the VPC.
    async fn access_subnets(&self, vlan_id: i64, subnets: &[ResourceRef]) -> Result<Vec<i64>> {
        let lookup = SubnetLookup {
            ctx: &self.ctx,
            vlan_id,
        };
        let iids = if subnets.is_empty() {
            let first = lookup
                .list(&self.ctx.scope)
                .await?
                .first()
                .map(|s| lookup.iid_of(s))
                .ok_or_else(|| CloudError::not_found(ResourceKind::Subnet, format!("any subnet on VLAN {}", vlan_id)))?;
            vec![first]
        } else {
            Resolver::new()
                .resolve_all(&lookup, &self.ctx.scope, subnets)
                .await?
        };
        iids.iter()
            .map(|iid| parse_id(ResourceKind::Subnet, &iid.system_id))
            .collect()
    }

    async fn create(&self, request: FileSystemRequest) -> Result<FileSystemInfo> {
        let ctx = &self.ctx;
        let order = storage_order(&request, ctx.datacenter())?;
        ensure_absent(&FileStorageLookup(ctx), &ctx.scope, &request.name).await?;
        let vpc = Resolver::new()
            .resolve_iid(&VlanLookup(ctx), &ctx.scope, &request.vpc)
            .await?;
        let vlan_id = parse_id(ResourceKind::Vpc, &vpc.system_id)?;
        let subnet_ids = self.access_subnets(vlan_id, &request.access_subnets).await?;

        let mut saga = Saga::new("create-file-system").with_cancellation(ctx.cancel.clone());

        let storage_id: i64 = saga
            .execute_with_undo(
                "order-file-storage",
                async {
                    let storage = ctx
                        .call(
                            ResourceKind::FileSystem,
                            &request.name,
                            "placeStorageOrder",
                            ctx.api.order_file_storage(&order),
                        )
                        .await?;
                    storage.id.ok_or_else(|| {
                        CloudError::provider(
                            ResourceKind::FileSystem,
                            &request.name,
                            "placeStorageOrder",
                            "no storage id returned",
                        )
                    })
                },
                |storage_id: &i64| delete_storage(Arc::clone(&self.ctx), *storage_id),
            )
            .await?;
        tracing::info!(name = %request.name, storage_id, "file storage ordered");

        let op = PollableOperation::new(ResourceKind::FileSystem, storage_id.to_string(), ctx.storage)
            .succeeds_on(&[STORAGE_STABLE])
            .fails_on(&[STORAGE_FAILED]);
        saga.execute(
            "wait-file-storage-stable",
            ctx.poller().wait_for_status(&op, || self.lifecycle(storage_id)),
        )
        .await?;

        saga.execute(
            "allow-access-subnets",
            ctx.call(
                ResourceKind::FileSystem,
                &storage_id.to_string(),
                "allowAccessFromSubnetList",
                ctx.api.allow_access_from_subnets(storage_id, &subnet_ids),
            ),
        )
        .await?;

        let namespace = ctx.namespace(NAMESPACE);
        let record = StoredFileSystem { vpc };
        saga.execute(
            "store-file-system",
            TypedRegistry::new(ctx.registry.as_ref(), &namespace).put(&storage_id.to_string(), &record),
        )
        .await?;

        let info = saga
            .execute("describe-file-system", self.describe_by_id(storage_id))
            .await?;
        saga.commit();
        tracing::info!(name = %request.name, storage_id, subnets = subnet_ids.len(), "file system created");
        Ok(info)
    }

    async fn list(&self) -> Result<Vec<FileSystemInfo>> {
        let volumes = FileStorageLookup(&self.ctx).list(&self.ctx.scope).await?;
        if volumes.is_empty() {
            return Ok(Vec::new());
        }
        let vlans = self.vlans().await?;
        let mut infos = Vec::with_capacity(volumes.len());
        for storage in &volumes {
            infos.push(self.describe(storage, &vlans).await?);
        }
        Ok(infos)
    }

    async fn get(&self, fs: &ResourceRef) -> Result<FileSystemInfo> {
        let storage = self.resolve(fs).await?;
        self.describe(&storage, &self.vlans().await?).await
    }

    async fn delete(&self, fs: &ResourceRef) -> Result<bool> {
        let ctx = &self.ctx;
        let storage = self.resolve(fs).await?;
        let storage_id = storage.id.unwrap_or_default();
        let target = storage_id.to_string();
        ctx.call(ResourceKind::FileSystem, &target, "deleteStorage", ctx.api.delete_file_storage(storage_id))
            .await?;
        ctx.registry.delete(&ctx.namespace(NAMESPACE), &target).await?;
        tracing::info!(storage_id, "file system deleted");
        Ok(true)
    }

    async fn allow(&self, fs: &ResourceRef, subnet: &ResourceRef) -> Result<FileSystemInfo> {
        let ctx = &self.ctx;
        let storage = self.resolve(fs).await?;
        let storage_id = storage.id.unwrap_or_default();
        let vlan_id = self.vlan_of(&storage).await?;
        let subnet_ids = self.access_subnets(vlan_id, std::slice::from_ref(subnet)).await?;
        if storage
            .allowed_subnets
            .iter()
            .any(|s| s.id.is_some_and(|id| subnet_ids.contains(&id)))
        {
            return Err(CloudError::already_exists(ResourceKind::Subnet, subnet.label()));
        }
        ctx.call(
            ResourceKind::FileSystem,
            &storage_id.to_string(),
            "allowAccessFromSubnetList",
            ctx.api.allow_access_from_subnets(storage_id, &subnet_ids),
        )
        .await?;
        self.describe_by_id(storage_id).await
    }

    async fn revoke(&self, fs: &ResourceRef, subnet: &ResourceRef) -> Result<bool> {
        let ctx = &self.ctx;
        let storage = self.resolve(fs).await?;
        let storage_id = storage.id.unwrap_or_default();
        let allowed = storage
            .allowed_subnets
            .iter()
            .find(|s| match (subnet.system_id(), subnet.name()) {
                (Some(id), _) => s.id.map(|sid| sid.to_string()).as_deref() == Some(id),
                (None, Some(name)) => subnet_name(s) == name,
                (None, None) => false,
            })
            .and_then(|s| s.id)
            .ok_or_else(|| CloudError::not_found(ResourceKind::Subnet, subnet.label()))?;
        ctx.call(
            ResourceKind::FileSystem,
            &storage_id.to_string(),
            "removeAccessFromSubnetList",
            ctx.api.remove_access_from_subnets(storage_id, &[allowed]),
        )
        .await
    }
}

#[async_trait]
impl FileSystemHandler for IbmFileSystemHandler {
    async fn create_file_system(&self, request: FileSystemRequest) -> Result<FileSystemInfo> {
        let timer = self.ctx.calls.start(ResourceKind::FileSystem, &request.name, "CreateFileSystem");
        timer.finish(self.create(request).await)
    }

    async fn list_file_system(&self) -> Result<Vec<FileSystemInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::FileSystem, "", "ListFileSystem");
        timer.finish(self.list().await)
    }

    async fn get_file_system(&self, fs: &ResourceRef) -> Result<FileSystemInfo> {
        let timer = self.ctx.calls.start(ResourceKind::FileSystem, fs.label(), "GetFileSystem");
        timer.finish(self.get(fs).await)
    }

    async fn delete_file_system(&self, fs: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::FileSystem, fs.label(), "DeleteFileSystem");
        timer.finish(self.delete(fs).await)
    }

    async fn add_access_subnet(&self, fs: &ResourceRef, subnet: &ResourceRef) -> Result<FileSystemInfo> {
        let timer = self.ctx.calls.start(ResourceKind::FileSystem, fs.label(), "AddAccessSubnet");
        timer.finish(self.allow(fs, subnet).await)
    }

    async fn remove_access_subnet(&self, fs: &ResourceRef, subnet: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::FileSystem, fs.label(), "RemoveAccessSubnet");
        timer.finish(self.revoke(fs, subnet).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{SUBNET_PRIMARY, Subnet};
    use crate::error::SoftLayerError;
    use crate::fake::{FakeSoftLayer, PUBLIC_SUBNET_ID, PUBLIC_VLAN_ID};
    use cloudplug_core::model::FileSystemStatus;
    use cloudplug_core::{PollConfig, Scope};
    use std::time::Duration;

    const VPC: &str = "fcr01a.dal10.1234";
    const SECOND_SUBNET_ID: i64 = 3_002;

    fn fake() -> FakeSoftLayer {
        FakeSoftLayer::seeded().with_subnet(Subnet {
            id: Some(SECOND_SUBNET_ID),
            network_identifier: Some("169.45.1.0".into()),
            cidr: Some(28),
            subnet_type: Some(SUBNET_PRIMARY.into()),
            network_vlan_id: Some(PUBLIC_VLAN_ID),
            ..Default::default()
        })
    }

    fn handler(fake: &FakeSoftLayer) -> IbmFileSystemHandler {
        let ctx = IbmContext::new(Arc::new(fake.clone()), Scope::region("dal10"))
            .unwrap()
            .with_storage_poll(PollConfig::new(5, Duration::from_secs(5)));
        IbmFileSystemHandler::new(Arc::new(ctx))
    }

    fn request(name: &str) -> FileSystemRequest {
        FileSystemRequest {
            name: name.into(),
            vpc: ResourceRef::by_name(VPC),
            ..Default::default()
        }
    }

    #[test]
    fn test_order_defaults() {
        let order = storage_order(&request("share-1"), "dal10").unwrap();
        assert_eq!(order.capacity_gb, DEFAULT_CAPACITY_GB);
        assert_eq!(order.iops, DEFAULT_IOPS);
        assert_eq!(order.nfs_version, "4.1");
        assert_eq!(order.location, "dal10");
    }

    #[test]
    fn test_order_rejects_out_of_range_values() {
        let invalid = |req: FileSystemRequest| {
            matches!(storage_order(&req, "dal10"), Err(CloudError::Validation { .. }))
        };
        assert!(invalid(FileSystemRequest {
            nfs_version: "3".into(),
            ..request("share-1")
        }));
        assert!(invalid(FileSystemRequest {
            iops: Some(50),
            ..request("share-1")
        }));
        assert!(invalid(FileSystemRequest {
            capacity_gb: 40_000,
            ..request("share-1")
        }));
        assert!(invalid(FileSystemRequest {
            vpc: ResourceRef::default(),
            ..request("share-1")
        }));
        assert!(invalid(request("")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_until_stable() {
        let fake = fake().with_storage_reads(2);
        let h = handler(&fake);
        let info = h
            .create_file_system(FileSystemRequest {
                capacity_gb: 20,
                access_subnets: vec![ResourceRef::by_name("169.45.1.0/28")],
                ..request("share-1")
            })
            .await
            .unwrap();

        assert_eq!(info.iid.name_id, "share-1");
        assert_eq!(info.status, FileSystemStatus::Available);
        assert_eq!(info.capacity_gb, 20);
        assert_eq!(info.vpc, Iid::new(VPC, PUBLIC_VLAN_ID.to_string()));
        assert_eq!(info.access_subnets, vec![Iid::new("169.45.1.0/28", SECOND_SUBNET_ID.to_string())]);
        assert_eq!(fake.call_count("placeStorageOrder"), 1);
        assert_eq!(fake.call_count("allowAccessFromSubnetList"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_defaults_to_first_subnet() {
        let fake = fake();
        let info = handler(&fake).create_file_system(request("share-1")).await.unwrap();
        assert_eq!(info.access_subnets.len(), 1);
        assert_eq!(info.access_subnets[0].system_id, PUBLIC_SUBNET_ID.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_volume_is_deleted() {
        let fake = fake().with_storage_reads(1).with_storage_state(STORAGE_FAILED);
        let err = handler(&fake).create_file_system(request("share-1")).await.unwrap_err();
        match &err {
            CloudError::SagaFailed { step, rolled_back, .. } => {
                assert_eq!(step, "wait-file-storage-stable");
                assert_eq!(rolled_back, &vec!["order-file-storage".to_string()]);
                assert!(matches!(err.root_cause(), CloudError::OperationFailed { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fake.call_count("deleteStorage"), 1);
        assert!(fake.file_storage().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_stable_times_out_and_rolls_back() {
        let fake = fake().with_storage_reads(100);
        let err = handler(&fake).create_file_system(request("share-1")).await.unwrap_err();
        assert!(matches!(err.root_cause(), CloudError::Timeout { .. }));
        assert!(fake.file_storage().is_empty());
        assert_eq!(fake.call_count("getStorage"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_failure_rolls_back_order() {
        let fake = fake().fail_on(
            "allowAccessFromSubnetList",
            SoftLayerError::api("SoftLayer_Exception_Public", "access denied"),
        );
        let err = handler(&fake).create_file_system(request("share-1")).await.unwrap_err();
        assert!(matches!(err, CloudError::SagaFailed { .. }));
        assert_eq!(fake.call_count("deleteStorage"), 1);
        assert!(fake.file_storage().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_name_is_rejected() {
        let fake = fake();
        let h = handler(&fake);
        h.create_file_system(request("share-1")).await.unwrap();
        let err = h.create_file_system(request("share-1")).await.unwrap_err();
        assert!(matches!(err, CloudError::AlreadyExists { .. }));
        assert_eq!(fake.call_count("placeStorageOrder"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_subnets_add_and_remove() {
        let fake = fake();
        let h = handler(&fake);
        h.create_file_system(request("share-1")).await.unwrap();
        let fs = ResourceRef::by_name("share-1");

        let info = h
            .add_access_subnet(&fs, &ResourceRef::by_name("169.45.1.0/28"))
            .await
            .unwrap();
        assert_eq!(info.access_subnets.len(), 2);

        let err = h
            .add_access_subnet(&fs, &ResourceRef::by_name("169.45.1.0/28"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::AlreadyExists { .. }));

        assert!(h
            .remove_access_subnet(&fs, &ResourceRef::by_id(PUBLIC_SUBNET_ID.to_string()))
            .await
            .unwrap());
        let err = h
            .remove_access_subnet(&fs, &ResourceRef::by_id(PUBLIC_SUBNET_ID.to_string()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        // the recorded VPC outlives the subnets
        let info = h.get_file_system(&fs).await.unwrap();
        assert_eq!(info.access_subnets.len(), 1);
        assert_eq!(info.vpc.system_id, PUBLIC_VLAN_ID.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_delete() {
        let fake = fake();
        let h = handler(&fake);
        h.create_file_system(request("share-1")).await.unwrap();
        h.create_file_system(request("share-2")).await.unwrap();

        let names: Vec<String> = h
            .list_file_system()
            .await
            .unwrap()
            .into_iter()
            .map(|fs| fs.iid.name_id)
            .collect();
        assert_eq!(names, ["share-1", "share-2"]);

        assert!(h.delete_file_system(&ResourceRef::by_name("share-1")).await.unwrap());
        assert_eq!(fake.file_storage().len(), 1);
        let err = h.get_file_system(&ResourceRef::by_name("share-1")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
