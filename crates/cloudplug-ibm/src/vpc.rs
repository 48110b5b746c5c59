//! VPCs
//!
//! SoftLayer has no VPC object. Each PUBLIC VLAN of the datacenter is
//! presented as a VPC whose subnets are the VLAN's PRIMARY subnets. VLANs
//! are ordered through the portal, so they are read only here.

use crate::api::NetworkVlan;
use crate::context::IbmContext;
use crate::lookup::{SubnetLookup, VlanLookup};
use crate::mapper;
use async_trait::async_trait;
use cloudplug_core::model::{SubnetRequest, VpcInfo, VpcRequest};
use cloudplug_core::{CloudError, Lookup, ResourceKind, ResourceRef, Resolver, Result, VpcHandler};
use std::sync::Arc;

pub struct IbmVpcHandler {
    ctx: Arc<IbmContext>,
}

impl IbmVpcHandler {
    pub fn new(ctx: Arc<IbmContext>) -> Self {
        Self { ctx }
    }

    async fn describe(&self, vlan: &NetworkVlan) -> Result<VpcInfo> {
        let Some(vlan_id) = vlan.id else {
            return Ok(mapper::map_vpc(vlan, &[], self.ctx.datacenter()));
        };
        let subnets = SubnetLookup {
            ctx: &self.ctx,
            vlan_id,
        }
        .list(&self.ctx.scope)
        .await?;
        Ok(mapper::map_vpc(vlan, &subnets, self.ctx.datacenter()))
    }

    async fn list(&self) -> Result<Vec<VpcInfo>> {
        let vlans = VlanLookup(&self.ctx).list(&self.ctx.scope).await?;
        let mut vpcs = Vec::with_capacity(vlans.len());
        for vlan in &vlans {
            vpcs.push(self.describe(vlan).await?);
        }
        Ok(vpcs)
    }

    async fn get(&self, vpc: &ResourceRef) -> Result<VpcInfo> {
        let vlan = Resolver::new()
            .resolve(&VlanLookup(&self.ctx), &self.ctx.scope, vpc)
            .await?
            .resource;
        self.describe(&vlan).await
    }
}

fn read_only(operation: &str) -> CloudError {
    CloudError::not_supported(ResourceKind::Vpc, operation)
}

#[async_trait]
impl VpcHandler for IbmVpcHandler {
    async fn create_vpc(&self, request: VpcRequest) -> Result<VpcInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, &request.name, "CreateVPC");
        timer.finish(Err(read_only("CreateVPC")))
    }

    async fn list_vpc(&self) -> Result<Vec<VpcInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, "", "ListVPC");
        timer.finish(self.list().await)
    }

    async fn get_vpc(&self, vpc: &ResourceRef) -> Result<VpcInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, vpc.label(), "GetVPC");
        timer.finish(self.get(vpc).await)
    }

    async fn delete_vpc(&self, vpc: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, vpc.label(), "DeleteVPC");
        timer.finish(Err(read_only("DeleteVPC")))
    }

    async fn add_subnet(&self, vpc: &ResourceRef, _subnet: SubnetRequest) -> Result<VpcInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, vpc.label(), "AddSubnet");
        timer.finish(Err(read_only("AddSubnet")))
    }

    async fn remove_subnet(&self, vpc: &ResourceRef, _subnet: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, vpc.label(), "RemoveSubnet");
        timer.finish(Err(read_only("RemoveSubnet")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeSoftLayer, PUBLIC_SUBNET_ID, PUBLIC_VLAN_ID};
    use cloudplug_core::Scope;

    fn handler() -> IbmVpcHandler {
        let ctx = IbmContext::new(Arc::new(FakeSoftLayer::seeded()), Scope::region("dal10")).unwrap();
        IbmVpcHandler::new(Arc::new(ctx))
    }

    #[tokio::test]
    async fn test_public_vlans_are_vpcs() {
        let h = handler();
        let vpcs = h.list_vpc().await.unwrap();
        assert_eq!(vpcs.len(), 1);

        let vpc = &vpcs[0];
        assert_eq!(vpc.iid.name_id, "fcr01a.dal10.1234");
        assert_eq!(vpc.iid.system_id, PUBLIC_VLAN_ID.to_string());
        assert_eq!(vpc.subnets.len(), 1);
        assert_eq!(vpc.subnets[0].iid.system_id, PUBLIC_SUBNET_ID.to_string());
        assert_eq!(vpc.subnets[0].zone, "dal10");
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let h = handler();
        let vpc = h.get_vpc(&ResourceRef::by_id(PUBLIC_VLAN_ID.to_string())).await.unwrap();
        assert_eq!(vpc.iid.name_id, "fcr01a.dal10.1234");
    }

    #[tokio::test]
    async fn test_changes_are_not_supported() {
        let h = handler();
        let err = h.create_vpc(VpcRequest::default()).await.unwrap_err();
        assert!(matches!(err, CloudError::NotSupported { .. }));
        let err = h.delete_vpc(&ResourceRef::by_name("fcr01a.dal10.1234")).await.unwrap_err();
        assert!(matches!(err, CloudError::NotSupported { .. }));
    }
}
