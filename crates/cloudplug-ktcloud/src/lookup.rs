//! Resolver lookups and VM dependency resolution

use crate::api::{Nlb, NlbFilter, SshKeyPair, Template, VirtualMachine, VmFilter, Volume, VolumeFilter};
use crate::context::KtContext;
use crate::security::{self, StoredSecurityGroup};
use crate::spec::VmSpec;
use crate::vpc::{self, StoredVpc};
use async_trait::async_trait;
use cloudplug_core::model::ImageType;
use cloudplug_core::{
    CloudError, DependencySource, Iid, Lookup, NameMatching, ResourceKind, ResourceRef, Resolver,
    Result, Scope,
};

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// VMs in the connection's zone. Names compare case-insensitively.
pub struct VmLookup<'a>(pub &'a KtContext);

impl VmLookup<'_> {
    fn filter(&self, vm_id: Option<&str>) -> VmFilter {
        VmFilter {
            zone_id: self.0.zone_id().to_string(),
            vm_id: vm_id.map(str::to_string),
            name: None,
        }
    }
}

#[async_trait]
impl Lookup for VmLookup<'_> {
    type Resource = VirtualMachine;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Vm
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<VirtualMachine>> {
        let ctx = self.0;
        let filter = self.filter(Some(id));
        Ok(ctx
            .call(ResourceKind::Vm, id, "listVirtualMachines", ctx.api.list_virtual_machines(&filter))
            .await?
            .into_iter()
            .find(|vm| vm.id.as_deref() == Some(id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<VirtualMachine>> {
        let ctx = self.0;
        let filter = self.filter(None);
        ctx.call(ResourceKind::Vm, "", "listVirtualMachines", ctx.api.list_virtual_machines(&filter))
            .await
    }

    fn iid_of(&self, vm: &VirtualMachine) -> Iid {
        let name = non_empty(&vm.name).or(non_empty(&vm.displayname)).unwrap_or_default();
        Iid::new(name, vm.id.clone().unwrap_or_default())
    }

    fn zone_of(&self, vm: &VirtualMachine) -> Option<String> {
        vm.zoneid.clone()
    }

    fn name_matching(&self) -> NameMatching {
        NameMatching::CaseInsensitive
    }
}

pub struct TemplateLookup<'a>(pub &'a KtContext);

#[async_trait]
impl Lookup for TemplateLookup<'_> {
    type Resource = Template;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    async fn fetch_by_id(&self, scope: &Scope, id: &str) -> Result<Option<Template>> {
        Ok(self
            .list(scope)
            .await?
            .into_iter()
            .find(|t| t.id.as_deref() == Some(id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<Template>> {
        let ctx = self.0;
        ctx.call(ResourceKind::Image, "", "listTemplates", ctx.api.list_templates(ctx.zone_id()))
            .await
    }

    fn iid_of(&self, template: &Template) -> Iid {
        Iid::new(
            template.name.clone().unwrap_or_default(),
            template.id.clone().unwrap_or_default(),
        )
    }

    fn zone_of(&self, template: &Template) -> Option<String> {
        template.zoneid.clone()
    }
}

/// Key pairs have no id on KT Cloud; the name serves as both.
pub struct KeyPairLookup<'a>(pub &'a KtContext);

#[async_trait]
impl Lookup for KeyPairLookup<'_> {
    type Resource = SshKeyPair;

    fn kind(&self) -> ResourceKind {
        ResourceKind::KeyPair
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<SshKeyPair>> {
        let ctx = self.0;
        Ok(ctx
            .call(ResourceKind::KeyPair, id, "listSSHKeyPairs", ctx.api.list_ssh_key_pairs(Some(id)))
            .await?
            .into_iter()
            .find(|k| k.name.as_deref() == Some(id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<SshKeyPair>> {
        let ctx = self.0;
        ctx.call(ResourceKind::KeyPair, "", "listSSHKeyPairs", ctx.api.list_ssh_key_pairs(None))
            .await
    }

    fn iid_of(&self, key: &SshKeyPair) -> Iid {
        let name = key.name.clone().unwrap_or_default();
        Iid::new(name.clone(), name)
    }
}

pub struct VolumeLookup<'a>(pub &'a KtContext);

#[async_trait]
impl Lookup for VolumeLookup<'_> {
    type Resource = Volume;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Disk
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<Volume>> {
        let ctx = self.0;
        let filter = VolumeFilter {
            zone_id: ctx.zone_id().to_string(),
            id: Some(id.to_string()),
        };
        Ok(ctx
            .call(ResourceKind::Disk, id, "listVolumes", ctx.api.list_volumes(&filter))
            .await?
            .into_iter()
            .find(|v| v.id.as_deref() == Some(id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<Volume>> {
        let ctx = self.0;
        let filter = VolumeFilter {
            zone_id: ctx.zone_id().to_string(),
            id: None,
        };
        ctx.call(ResourceKind::Disk, "", "listVolumes", ctx.api.list_volumes(&filter))
            .await
    }

    fn iid_of(&self, volume: &Volume) -> Iid {
        Iid::new(
            volume.name.clone().unwrap_or_default(),
            volume.id.clone().unwrap_or_default(),
        )
    }
}

pub struct SecurityGroupLookup<'a>(pub &'a KtContext);

#[async_trait]
impl Lookup for SecurityGroupLookup<'_> {
    type Resource = StoredSecurityGroup;

    fn kind(&self) -> ResourceKind {
        ResourceKind::SecurityGroup
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<StoredSecurityGroup>> {
        match security::load_group(self.0, &ResourceRef::by_id(id)).await {
            Ok((group, _)) => Ok(Some(group)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<StoredSecurityGroup>> {
        Ok(security::list_groups(self.0)
            .await?
            .into_iter()
            .map(|(group, _)| group)
            .collect())
    }

    fn iid_of(&self, group: &StoredSecurityGroup) -> Iid {
        Iid::new(&group.name, &group.name)
    }
}

pub struct VpcLookup<'a>(pub &'a KtContext);

#[async_trait]
impl Lookup for VpcLookup<'_> {
    type Resource = StoredVpc;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Vpc
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<StoredVpc>> {
        match vpc::load_vpc(self.0, &ResourceRef::by_id(id)).await {
            Ok(found) => Ok(Some(found)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<StoredVpc>> {
        vpc::list_vpcs(self.0).await
    }

    fn iid_of(&self, vpc: &StoredVpc) -> Iid {
        Iid::new(&vpc.name, &vpc.name)
    }
}

pub struct NlbLookup<'a>(pub &'a KtContext);

impl NlbLookup<'_> {
    fn filter(&self, nlb_id: Option<&str>) -> NlbFilter {
        NlbFilter {
            zone_id: self.0.zone_id().to_string(),
            nlb_id: nlb_id.map(str::to_string),
        }
    }
}

#[async_trait]
impl Lookup for NlbLookup<'_> {
    type Resource = Nlb;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Nlb
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<Nlb>> {
        let ctx = self.0;
        let filter = self.filter(Some(id));
        Ok(ctx
            .call(ResourceKind::Nlb, id, "listNLBs", ctx.api.list_nlbs(&filter))
            .await?
            .into_iter()
            .find(|n| n.nlbid.as_deref() == Some(id)))
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<Nlb>> {
        let ctx = self.0;
        let filter = self.filter(None);
        ctx.call(ResourceKind::Nlb, "", "listNLBs", ctx.api.list_nlbs(&filter)).await
    }

    fn iid_of(&self, nlb: &Nlb) -> Iid {
        Iid::new(
            nlb.name.clone().unwrap_or_default(),
            nlb.nlbid.clone().unwrap_or_default(),
        )
    }

    fn zone_of(&self, nlb: &Nlb) -> Option<String> {
        nlb.zoneid.clone()
    }
}

/// Resolves the references of a VM request against KT Cloud.
pub struct KtDependencies<'a>(pub &'a KtContext);

#[async_trait]
impl DependencySource for KtDependencies<'_> {
    async fn resolve_image(&self, scope: &Scope, _image_type: ImageType, image: &ResourceRef) -> Result<Iid> {
        // templates cover both public and private images
        Resolver::new()
            .resolve_iid(&TemplateLookup(self.0), scope, image)
            .await
    }

    async fn resolve_spec(&self, _scope: &Scope, spec_name: &str) -> Result<String> {
        let ctx = self.0;
        let spec: VmSpec = spec_name.parse()?;

        let offerings = ctx
            .call(ResourceKind::VmSpec, spec_name, "listServiceOfferings", ctx.api.list_service_offerings(ctx.zone_id()))
            .await?;
        if !offerings
            .iter()
            .any(|o| o.id.as_deref() == Some(spec.service_offering_id.as_str()))
        {
            return Err(CloudError::not_found(ResourceKind::VmSpec, &spec.service_offering_id));
        }

        if let Some(disk_offering) = &spec.disk_offering_id {
            let disks = ctx
                .call(ResourceKind::VmSpec, spec_name, "listDiskOfferings", ctx.api.list_disk_offerings(ctx.zone_id()))
                .await?;
            if !disks.iter().any(|d| d.id.as_deref() == Some(disk_offering.as_str())) {
                return Err(CloudError::not_found(ResourceKind::VmSpec, disk_offering));
            }
        }
        Ok(spec.to_string())
    }

    async fn resolve_key_pair(&self, scope: &Scope, key_pair: &ResourceRef) -> Result<Iid> {
        Resolver::new()
            .resolve_iid(&KeyPairLookup(self.0), scope, key_pair)
            .await
    }

    async fn resolve_vpc(&self, scope: &Scope, vpc: &ResourceRef) -> Result<Iid> {
        Resolver::new().resolve_iid(&VpcLookup(self.0), scope, vpc).await
    }

    async fn resolve_subnet(&self, _scope: &Scope, vpc: &Iid, subnet: &ResourceRef) -> Result<Iid> {
        let stored = vpc::load_vpc(self.0, &ResourceRef::from(vpc)).await?;
        stored
            .find_subnet(subnet)
            .map(|s| Iid::new(&s.name, &s.name))
            .ok_or_else(|| CloudError::not_found(ResourceKind::Subnet, subnet.label()))
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
    use crate::fake::FakeKtCloud;
    use std::sync::Arc;

    fn vm(id: &str, name: &str) -> VirtualMachine {
        VirtualMachine {
            id: Some(id.into()),
            name: Some(name.into()),
            zoneid: Some("kr-0".into()),
            state: Some("Running".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_vm_name_and_id_resolve_alike() {
        let fake = Arc::new(FakeKtCloud::new().with_vm(vm("vm-1", "Web-1")).with_vm(vm("vm-2", "db-1")));
        let ctx = KtContext::new(fake, Scope::zone("KR", "kr-0")).unwrap();
        let resolver = Resolver::new();

        let by_name = resolver
            .resolve_iid(&VmLookup(&ctx), &ctx.scope, &ResourceRef::by_name("web-1"))
            .await
            .unwrap();
        let by_id = resolver
            .resolve_iid(&VmLookup(&ctx), &ctx.scope, &ResourceRef::by_id("vm-1"))
            .await
            .unwrap();
        assert_eq!(by_name, by_id);
        assert_eq!(by_id, Iid::new("Web-1", "vm-1"));
    }

    #[tokio::test]
    async fn test_spec_requires_known_offerings() {
        let fake = Arc::new(FakeKtCloud::seeded());
        let ctx = KtContext::new(fake, Scope::zone("KR", "kr-0")).unwrap();
        let deps = KtDependencies(&ctx);

        assert_eq!(
            deps.resolve_spec(&ctx.scope, "svc-1c2g!dsk-100_disk100GB").await.unwrap(),
            "svc-1c2g!dsk-100_disk100GB"
        );
        let err = deps.resolve_spec(&ctx.scope, "svc-9!dsk-100_disk100GB").await.unwrap_err();
        assert!(err.is_not_found());
        let err = deps.resolve_spec(&ctx.scope, "svc-1c2g!dsk-9_disk100GB").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_key_pair_id_is_its_name() {
        let fake = Arc::new(FakeKtCloud::new().with_key_pair("key-a", "aa:bb"));
        let ctx = KtContext::new(fake, Scope::zone("KR", "kr-0")).unwrap();
        let iid = KtDependencies(&ctx)
            .resolve_key_pair(&ctx.scope, &ResourceRef::by_id("key-a"))
            .await
            .unwrap();
        assert_eq!(iid, Iid::new("key-a", "key-a"));
    }
}
