//! Resolver lookups and VM dependency resolution

use crate::api::{
    FileStorage, GuestFilter, NETWORK_PUBLIC, NetworkVlan, ProductItem, SUBNET_PRIMARY, SecurityGroup, SshKey,
    Subnet, VirtualGuest,
};
use crate::catalog;
use crate::context::{IbmContext, parse_id};
use crate::mapper::storage_name;
use async_trait::async_trait;
use cloudplug_core::model::ImageType;
use cloudplug_core::{DependencySource, Iid, Lookup, ResourceKind, ResourceRef, Resolver, Result, Scope};

fn id_string(id: Option<i64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_default()
}

/// `routerHostname.vlanNumber`, the name a VLAN goes by as a VPC
pub fn vlan_name(vlan: &NetworkVlan) -> String {
    let router = vlan
        .primary_router
        .as_ref()
        .and_then(|r| r.hostname.as_deref())
        .unwrap_or_default();
    format!("{}.{}", router, vlan.vlan_number.unwrap_or_default())
}

/// `networkIdentifier/cidr`, the name a subnet goes by
pub fn subnet_name(subnet: &Subnet) -> String {
    format!(
        "{}/{}",
        subnet.network_identifier.as_deref().unwrap_or_default(),
        subnet.cidr.unwrap_or_default()
    )
}

/// Virtual guests in the connection's datacenter, by hostname.
pub struct GuestLookup<'a>(pub &'a IbmContext);

#[async_trait]
impl Lookup for GuestLookup<'_> {
    type Resource = VirtualGuest;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Vm
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<VirtualGuest>> {
        let ctx = self.0;
        let guest_id = parse_id(ResourceKind::Vm, id)?;
        ctx.call_optional(ResourceKind::Vm, id, "getObject", ctx.api.get_virtual_guest(guest_id))
            .await
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<VirtualGuest>> {
        let ctx = self.0;
        let filter = GuestFilter {
            datacenter: Some(ctx.datacenter().to_string()),
            hostname: None,
        };
        ctx.call(ResourceKind::Vm, "", "getVirtualGuests", ctx.api.list_virtual_guests(&filter))
            .await
    }

    fn iid_of(&self, guest: &VirtualGuest) -> Iid {
        Iid::new(guest.hostname.clone().unwrap_or_default(), id_string(guest.id))
    }

    fn zone_of(&self, guest: &VirtualGuest) -> Option<String> {
        guest.datacenter.as_ref().and_then(|d| d.name.clone())
    }
}

/// SSH keys by label.
pub struct SshKeyLookup<'a>(pub &'a IbmContext);

#[async_trait]
impl Lookup for SshKeyLookup<'_> {
    type Resource = SshKey;

    fn kind(&self) -> ResourceKind {
        ResourceKind::KeyPair
    }

    async fn fetch_by_id(&self, scope: &Scope, id: &str) -> Result<Option<SshKey>> {
        let key_id = parse_id(ResourceKind::KeyPair, id)?;
        Ok(self
            .list(scope)
            .await?
            .into_iter()
            .find(|k| k.id == Some(key_id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<SshKey>> {
        let ctx = self.0;
        ctx.call(ResourceKind::KeyPair, "", "getSshKeys", ctx.api.list_ssh_keys(None))
            .await
    }

    fn iid_of(&self, key: &SshKey) -> Iid {
        Iid::new(key.label.clone().unwrap_or_default(), id_string(key.id))
    }
}

/// PUBLIC VLANs of the datacenter; each one is exposed as a VPC.
pub struct VlanLookup<'a>(pub &'a IbmContext);

#[async_trait]
impl Lookup for VlanLookup<'_> {
    type Resource = NetworkVlan;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Vpc
    }

    async fn fetch_by_id(&self, scope: &Scope, id: &str) -> Result<Option<NetworkVlan>> {
        let vlan_id = parse_id(ResourceKind::Vpc, id)?;
        Ok(self
            .list(scope)
            .await?
            .into_iter()
            .find(|v| v.id == Some(vlan_id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<NetworkVlan>> {
        let ctx = self.0;
        Ok(ctx
            .call(ResourceKind::Vpc, "", "getNetworkVlans", ctx.api.list_network_vlans(ctx.datacenter()))
            .await?
            .into_iter()
            .filter(|v| v.network_space.as_deref() == Some(NETWORK_PUBLIC))
            .collect())
    }

    fn iid_of(&self, vlan: &NetworkVlan) -> Iid {
        Iid::new(vlan_name(vlan), id_string(vlan.id))
    }
}

/// PRIMARY subnets of one VLAN, named by CIDR.
pub struct SubnetLookup<'a> {
    pub ctx: &'a IbmContext,
    pub vlan_id: i64,
}

#[async_trait]
impl Lookup for SubnetLookup<'_> {
    type Resource = Subnet;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Subnet
    }

    async fn fetch_by_id(&self, scope: &Scope, id: &str) -> Result<Option<Subnet>> {
        let subnet_id = parse_id(ResourceKind::Subnet, id)?;
        Ok(self
            .list(scope)
            .await?
            .into_iter()
            .find(|s| s.id == Some(subnet_id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<Subnet>> {
        let ctx = self.ctx;
        let target = self.vlan_id.to_string();
        Ok(ctx
            .call(ResourceKind::Subnet, &target, "getSubnets", ctx.api.list_subnets(self.vlan_id))
            .await?
            .into_iter()
            .filter(|s| s.subnet_type.as_deref() == Some(SUBNET_PRIMARY))
            .collect())
    }

    fn iid_of(&self, subnet: &Subnet) -> Iid {
        Iid::new(subnet_name(subnet), id_string(subnet.id))
    }
}

pub struct SecurityGroupLookup<'a>(pub &'a IbmContext);

#[async_trait]
impl Lookup for SecurityGroupLookup<'_> {
    type Resource = SecurityGroup;

    fn kind(&self) -> ResourceKind {
        ResourceKind::SecurityGroup
    }

    async fn fetch_by_id(&self, scope: &Scope, id: &str) -> Result<Option<SecurityGroup>> {
        let group_id = parse_id(ResourceKind::SecurityGroup, id)?;
        Ok(self
            .list(scope)
            .await?
            .into_iter()
            .find(|g| g.id == Some(group_id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<SecurityGroup>> {
        let ctx = self.0;
        ctx.call(ResourceKind::SecurityGroup, "", "getSecurityGroups", ctx.api.list_security_groups())
            .await
    }

    fn iid_of(&self, group: &SecurityGroup) -> Iid {
        Iid::new(group.name.clone().unwrap_or_default(), id_string(group.id))
    }
}

/// Orderable OS items. The item key name is the image name.
pub struct OsImageLookup<'a>(pub &'a IbmContext);

#[async_trait]
impl Lookup for OsImageLookup<'_> {
    type Resource = ProductItem;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    async fn fetch_by_id(&self, scope: &Scope, id: &str) -> Result<Option<ProductItem>> {
        let item_id = parse_id(ResourceKind::Image, id)?;
        Ok(self
            .list(scope)
            .await?
            .into_iter()
            .find(|i| i.id == Some(item_id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<ProductItem>> {
        catalog::os_images(self.0).await
    }

    fn iid_of(&self, item: &ProductItem) -> Iid {
        Iid::new(item.key_name.clone().unwrap_or_default(), id_string(item.id))
    }
}

/// NAS volumes of the datacenter, by the name kept in their notes.
pub struct FileStorageLookup<'a>(pub &'a IbmContext);

#[async_trait]
impl Lookup for FileStorageLookup<'_> {
    type Resource = FileStorage;

    fn kind(&self) -> ResourceKind {
        ResourceKind::FileSystem
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<FileStorage>> {
        let ctx = self.0;
        let storage_id = parse_id(ResourceKind::FileSystem, id)?;
        ctx.call_optional(ResourceKind::FileSystem, id, "getStorage", ctx.api.get_file_storage(storage_id))
            .await
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<FileStorage>> {
        let ctx = self.0;
        Ok(ctx
            .call(ResourceKind::FileSystem, "", "getNasNetworkStorage", ctx.api.list_file_storage())
            .await?
            .into_iter()
            .filter(|s| s.datacenter.as_ref().and_then(|d| d.name.as_deref()) == Some(ctx.datacenter()))
            .collect())
    }

    fn iid_of(&self, storage: &FileStorage) -> Iid {
        Iid::new(storage_name(storage), id_string(storage.id))
    }

    fn zone_of(&self, storage: &FileStorage) -> Option<String> {
        storage.datacenter.as_ref().and_then(|d| d.name.clone())
    }
}

/// Resolves the references of a VM request against SoftLayer.
pub struct IbmDependencies<'a>(pub &'a IbmContext);

#[async_trait]
impl DependencySource for IbmDependencies<'_> {
    async fn resolve_image(&self, scope: &Scope, _image_type: ImageType, image: &ResourceRef) -> Result<Iid> {
        Resolver::new()
            .resolve_iid(&OsImageLookup(self.0), scope, image)
            .await
    }

    /// Specs are preset key names.
    async fn resolve_spec(&self, _scope: &Scope, spec_name: &str) -> Result<String> {
        let package_id = catalog::public_package(self.0).await?;
        catalog::find_preset(self.0, package_id, spec_name).await?;
        Ok(spec_name.to_string())
    }

    async fn resolve_key_pair(&self, scope: &Scope, key_pair: &ResourceRef) -> Result<Iid> {
        Resolver::new()
            .resolve_iid(&SshKeyLookup(self.0), scope, key_pair)
            .await
    }

    async fn resolve_vpc(&self, scope: &Scope, vpc: &ResourceRef) -> Result<Iid> {
        Resolver::new().resolve_iid(&VlanLookup(self.0), scope, vpc).await
    }

    async fn resolve_subnet(&self, scope: &Scope, vpc: &Iid, subnet: &ResourceRef) -> Result<Iid> {
        let lookup = SubnetLookup {
            ctx: self.0,
            vlan_id: parse_id(ResourceKind::Vpc, &vpc.system_id)?,
        };
        Resolver::new().resolve_iid(&lookup, scope, subnet).await
    }

    async fn resolve_security_group(&self, scope: &Scope, _vpc: Option<&Iid>, group: &ResourceRef) -> Result<Iid> {
        Resolver::new()
            .resolve_iid(&SecurityGroupLookup(self.0), scope, group)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeSoftLayer, PUBLIC_SUBNET_ID, PUBLIC_VLAN_ID};
    use cloudplug_core::{CloudError, ensure_absent};
    use std::sync::Arc;

    fn ctx(fake: FakeSoftLayer) -> IbmContext {
        IbmContext::new(Arc::new(fake), Scope::region("dal10")).unwrap()
    }

    #[tokio::test]
    async fn test_guest_name_and_id_resolve_alike() {
        let ctx = ctx(FakeSoftLayer::seeded().with_running_guest(101, "web-1"));
        let resolver = Resolver::new();

        let by_name = resolver
            .resolve_iid(&GuestLookup(&ctx), &ctx.scope, &ResourceRef::by_name("web-1"))
            .await
            .unwrap();
        let by_id = resolver
            .resolve_iid(&GuestLookup(&ctx), &ctx.scope, &ResourceRef::by_id("101"))
            .await
            .unwrap();
        assert_eq!(by_name, by_id);
        assert_eq!(by_id, Iid::new("web-1", "101"));

        let err = resolver
            .resolve_iid(&GuestLookup(&ctx), &ctx.scope, &ResourceRef::by_id("999"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_hostnames_compare_exactly() {
        let ctx = ctx(FakeSoftLayer::seeded().with_running_guest(101, "web-1"));
        assert!(ensure_absent(&GuestLookup(&ctx), &ctx.scope, "WEB-1").await.is_ok());
        let err = ensure_absent(&GuestLookup(&ctx), &ctx.scope, "web-1").await.unwrap_err();
        assert!(matches!(err, CloudError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_vpc_and_subnet_names() {
        let ctx = ctx(FakeSoftLayer::seeded());
        let deps = IbmDependencies(&ctx);

        let vpc = deps
            .resolve_vpc(&ctx.scope, &ResourceRef::by_name("fcr01a.dal10.1234"))
            .await
            .unwrap();
        assert_eq!(vpc.system_id, PUBLIC_VLAN_ID.to_string());

        let subnet = deps
            .resolve_subnet(&ctx.scope, &vpc, &ResourceRef::by_name("169.45.0.0/26"))
            .await
            .unwrap();
        assert_eq!(subnet.system_id, PUBLIC_SUBNET_ID.to_string());

        // private VLANs are not VPCs
        let err = deps
            .resolve_vpc(&ctx.scope, &ResourceRef::by_name("bcr01a.dal10.1235"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_image_id_resolves_to_key_name() {
        let ctx = ctx(FakeSoftLayer::seeded());
        let image = IbmDependencies(&ctx)
            .resolve_image(&ctx.scope, ImageType::PublicImage, &ResourceRef::by_id("40"))
            .await
            .unwrap();
        assert_eq!(image.name_id, "OS_UBUNTU_22_04_LTS_JAMMY_JELLYFISH_64_BIT");
    }

    #[tokio::test]
    async fn test_spec_must_be_an_active_preset() {
        let ctx = ctx(FakeSoftLayer::seeded());
        let deps = IbmDependencies(&ctx);
        assert_eq!(deps.resolve_spec(&ctx.scope, "B1_1X2X25").await.unwrap(), "B1_1X2X25");
        assert!(deps.resolve_spec(&ctx.scope, "C1_2X2X25").await.unwrap_err().is_not_found());
    }
}
