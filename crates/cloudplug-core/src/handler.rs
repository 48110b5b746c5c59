//! Resource handler traits
//!
//! A driver exposes one handler per resource type. Handlers take canonical
//! requests and references and return canonical info snapshots; everything
//! provider-specific stays behind them.

use crate::error::{CloudError, Result};
use crate::identity::{ResourceKind, ResourceRef};
use crate::model::{
    DiskInfo, DiskRequest, FileSystemInfo, FileSystemRequest, ImageInfo, KeyPairInfo,
    KeyPairRequest, KeyValue, NlbHealthInfo, NlbInfo, NlbRequest, SecurityGroupInfo,
    SecurityGroupRequest, SecurityRule, SubnetRequest, VmInfo, VmRequest, VmSpecInfo, VmStatus,
    VmStatusInfo, VpcInfo, VpcRequest,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// VM lifecycle
#[async_trait]
pub trait VmHandler: Send + Sync {
    /// Provisions a VM and waits until it is running
    async fn start_vm(&self, request: VmRequest) -> Result<VmInfo>;

    /// Stops a running VM
    async fn suspend_vm(&self, vm: &ResourceRef) -> Result<VmStatus>;

    /// Starts a suspended VM
    async fn resume_vm(&self, vm: &ResourceRef) -> Result<VmStatus>;

    async fn reboot_vm(&self, vm: &ResourceRef) -> Result<VmStatus>;

    /// Deletes a VM together with the network resources created for it
    async fn terminate_vm(&self, vm: &ResourceRef) -> Result<VmStatus>;

    async fn list_vm_status(&self) -> Result<Vec<VmStatusInfo>>;

    async fn get_vm_status(&self, vm: &ResourceRef) -> Result<VmStatus>;

    async fn list_vm(&self) -> Result<Vec<VmInfo>>;

    async fn get_vm(&self, vm: &ResourceRef) -> Result<VmInfo>;
}

/// Block storage
#[async_trait]
pub trait DiskHandler: Send + Sync {
    async fn create_disk(&self, request: DiskRequest) -> Result<DiskInfo>;

    async fn list_disk(&self) -> Result<Vec<DiskInfo>>;

    async fn get_disk(&self, disk: &ResourceRef) -> Result<DiskInfo>;

    /// Resizes a disk. `size` is in GB.
    async fn change_disk_size(&self, disk: &ResourceRef, size: &str) -> Result<bool>;

    async fn delete_disk(&self, disk: &ResourceRef) -> Result<bool>;

    /// Attaches a disk to a VM and returns the disk as it is afterwards
    async fn attach_disk(&self, disk: &ResourceRef, vm: &ResourceRef) -> Result<DiskInfo>;

    async fn detach_disk(&self, disk: &ResourceRef, vm: &ResourceRef) -> Result<bool>;
}

/// SSH key pairs
#[async_trait]
pub trait KeyPairHandler: Send + Sync {
    /// Creates a key pair. The private key is only returned here.
    async fn create_key(&self, request: KeyPairRequest) -> Result<KeyPairInfo>;

    async fn list_key(&self) -> Result<Vec<KeyPairInfo>>;

    async fn get_key(&self, key: &ResourceRef) -> Result<KeyPairInfo>;

    async fn delete_key(&self, key: &ResourceRef) -> Result<bool>;
}

/// Security groups and their rules
#[async_trait]
pub trait SecurityHandler: Send + Sync {
    async fn create_security(&self, request: SecurityGroupRequest) -> Result<SecurityGroupInfo>;

    async fn list_security(&self) -> Result<Vec<SecurityGroupInfo>>;

    async fn get_security(&self, group: &ResourceRef) -> Result<SecurityGroupInfo>;

    async fn delete_security(&self, group: &ResourceRef) -> Result<bool>;

    async fn add_rules(&self, group: &ResourceRef, rules: &[SecurityRule]) -> Result<SecurityGroupInfo>;

    async fn remove_rules(&self, group: &ResourceRef, rules: &[SecurityRule]) -> Result<bool>;
}

/// VPCs and subnets
#[async_trait]
pub trait VpcHandler: Send + Sync {
    async fn create_vpc(&self, request: VpcRequest) -> Result<VpcInfo>;

    async fn list_vpc(&self) -> Result<Vec<VpcInfo>>;

    async fn get_vpc(&self, vpc: &ResourceRef) -> Result<VpcInfo>;

    async fn delete_vpc(&self, vpc: &ResourceRef) -> Result<bool>;

    async fn add_subnet(&self, vpc: &ResourceRef, subnet: SubnetRequest) -> Result<VpcInfo>;

    async fn remove_subnet(&self, vpc: &ResourceRef, subnet: &ResourceRef) -> Result<bool>;
}

/// Machine images
#[async_trait]
pub trait ImageHandler: Send + Sync {
    async fn list_image(&self) -> Result<Vec<ImageInfo>>;

    async fn get_image(&self, image: &ResourceRef) -> Result<ImageInfo>;

    async fn delete_image(&self, image: &ResourceRef) -> Result<bool>;
}

/// Key/value tags on other resources
#[async_trait]
pub trait TagHandler: Send + Sync {
    async fn add_tag(&self, kind: ResourceKind, resource: &ResourceRef, tag: KeyValue) -> Result<KeyValue>;

    async fn list_tag(&self, kind: ResourceKind, resource: &ResourceRef) -> Result<Vec<KeyValue>>;

    async fn get_tag(&self, kind: ResourceKind, resource: &ResourceRef, key: &str) -> Result<KeyValue>;

    async fn remove_tag(&self, kind: ResourceKind, resource: &ResourceRef, key: &str) -> Result<bool>;
}

/// Network load balancers
#[async_trait]
pub trait NlbHandler: Send + Sync {
    /// Creates a load balancer with its listener and initial VM group
    async fn create_nlb(&self, request: NlbRequest) -> Result<NlbInfo>;

    async fn list_nlb(&self) -> Result<Vec<NlbInfo>>;

    async fn get_nlb(&self, nlb: &ResourceRef) -> Result<NlbInfo>;

    async fn delete_nlb(&self, nlb: &ResourceRef) -> Result<bool>;

    /// Adds VMs to the group. Either all of them join or none do.
    async fn add_vms(&self, nlb: &ResourceRef, vms: &[ResourceRef]) -> Result<NlbInfo>;

    async fn remove_vms(&self, nlb: &ResourceRef, vms: &[ResourceRef]) -> Result<bool>;

    async fn get_vm_group_health(&self, nlb: &ResourceRef) -> Result<NlbHealthInfo>;
}

/// Shared NFS file systems
#[async_trait]
pub trait FileSystemHandler: Send + Sync {
    /// Creates a file system and waits until it is available
    async fn create_file_system(&self, request: FileSystemRequest) -> Result<FileSystemInfo>;

    async fn list_file_system(&self) -> Result<Vec<FileSystemInfo>>;

    async fn get_file_system(&self, fs: &ResourceRef) -> Result<FileSystemInfo>;

    async fn delete_file_system(&self, fs: &ResourceRef) -> Result<bool>;

    async fn add_access_subnet(&self, fs: &ResourceRef, subnet: &ResourceRef) -> Result<FileSystemInfo>;

    async fn remove_access_subnet(&self, fs: &ResourceRef, subnet: &ResourceRef) -> Result<bool>;
}

/// VM specs (flavors) offered in the connection's region
#[async_trait]
pub trait VmSpecHandler: Send + Sync {
    async fn list_vm_spec(&self) -> Result<Vec<VmSpecInfo>>;

    async fn get_vm_spec(&self, name: &str) -> Result<VmSpecInfo>;
}

/// Which handlers a driver provides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub vm: bool,
    pub disk: bool,
    pub key_pair: bool,
    pub security: bool,
    pub vpc: bool,
    pub image: bool,
    pub tag: bool,
    pub nlb: bool,
    pub file_system: bool,
    pub vm_spec: bool,
}

/// A cloud driver connection
///
/// Handlers a driver does not provide return [`CloudError::NotSupported`].
pub trait CloudDriver: Send + Sync {
    /// Short provider name (e.g. "ktcloud")
    fn name(&self) -> &str;

    /// Provider name for display
    fn display_name(&self) -> &str;

    fn capabilities(&self) -> DriverCapabilities;

    fn vm_handler(&self) -> Result<Arc<dyn VmHandler>> {
        Err(CloudError::not_supported(ResourceKind::Vm, "vm handler"))
    }

    fn disk_handler(&self) -> Result<Arc<dyn DiskHandler>> {
        Err(CloudError::not_supported(ResourceKind::Disk, "disk handler"))
    }

    fn key_pair_handler(&self) -> Result<Arc<dyn KeyPairHandler>> {
        Err(CloudError::not_supported(ResourceKind::KeyPair, "key pair handler"))
    }

    fn security_handler(&self) -> Result<Arc<dyn SecurityHandler>> {
        Err(CloudError::not_supported(ResourceKind::SecurityGroup, "security handler"))
    }

    fn vpc_handler(&self) -> Result<Arc<dyn VpcHandler>> {
        Err(CloudError::not_supported(ResourceKind::Vpc, "vpc handler"))
    }

    fn image_handler(&self) -> Result<Arc<dyn ImageHandler>> {
        Err(CloudError::not_supported(ResourceKind::Image, "image handler"))
    }

    fn tag_handler(&self) -> Result<Arc<dyn TagHandler>> {
        Err(CloudError::not_supported(ResourceKind::Tag, "tag handler"))
    }

    fn nlb_handler(&self) -> Result<Arc<dyn NlbHandler>> {
        Err(CloudError::not_supported(ResourceKind::Nlb, "nlb handler"))
    }

    fn file_system_handler(&self) -> Result<Arc<dyn FileSystemHandler>> {
        Err(CloudError::not_supported(ResourceKind::FileSystem, "file system handler"))
    }

    fn vm_spec_handler(&self) -> Result<Arc<dyn VmSpecHandler>> {
        Err(CloudError::not_supported(ResourceKind::VmSpec, "vm spec handler"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyDriver;

    impl CloudDriver for EmptyDriver {
        fn name(&self) -> &str {
            "empty"
        }

        fn display_name(&self) -> &str {
            "Empty"
        }

        fn capabilities(&self) -> DriverCapabilities {
            DriverCapabilities::default()
        }
    }

    #[test]
    fn test_missing_handlers_are_not_supported() {
        let driver = EmptyDriver;
        assert!(matches!(
            driver.disk_handler(),
            Err(CloudError::NotSupported { kind: ResourceKind::Disk, .. })
        ));
        assert!(driver.tag_handler().is_err());
        assert!(matches!(
            driver.nlb_handler(),
            Err(CloudError::NotSupported { kind: ResourceKind::Nlb, .. })
        ));
        assert!(!driver.capabilities().vm);
    }
}
