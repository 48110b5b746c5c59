//! VPCs
//!
//! KT Cloud zones have a single flat network, so VPCs and subnets are
//! logical records kept in the local registry. They exist so that callers
//! can use the same request shape as on other providers; a VM only carries
//! their names in its tags.

use crate::context::KtContext;
use async_trait::async_trait;
use cloudplug_core::model::{KeyValue, SubnetInfo, SubnetRequest, VpcInfo, VpcRequest};
use cloudplug_core::{CloudError, Iid, ResourceKind, ResourceRef, Result, TypedRegistry, VpcHandler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const NAMESPACE: &str = "vpc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSubnet {
    pub name: String,
    pub zone: String,
    #[serde(default)]
    pub ipv4_cidr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVpc {
    pub name: String,
    #[serde(default)]
    pub ipv4_cidr: String,
    #[serde(default)]
    pub subnets: Vec<StoredSubnet>,
}

impl StoredVpc {
    pub fn info(&self) -> VpcInfo {
        VpcInfo {
            iid: Iid::new(&self.name, &self.name),
            ipv4_cidr: self.ipv4_cidr.clone(),
            subnets: self
                .subnets
                .iter()
                .map(|s| SubnetInfo {
                    iid: Iid::new(&s.name, &s.name),
                    zone: s.zone.clone(),
                    ipv4_cidr: s.ipv4_cidr.clone(),
                    key_values: Vec::new(),
                })
                .collect(),
            key_values: vec![KeyValue::new("KTCloud-VPC-info", "Logical VPC kept by the driver")],
        }
    }

    pub fn find_subnet(&self, subnet: &ResourceRef) -> Option<&StoredSubnet> {
        let key = subnet.system_id().or(subnet.name())?;
        self.subnets.iter().find(|s| s.name == key)
    }
}

fn vpc_key(vpc: &ResourceRef) -> Result<&str> {
    vpc.require(ResourceKind::Vpc)?;
    Ok(vpc.system_id().or(vpc.name()).unwrap_or_default())
}

pub async fn load_vpc(ctx: &KtContext, vpc: &ResourceRef) -> Result<StoredVpc> {
    let key = vpc_key(vpc)?;
    let namespace = ctx.namespace(NAMESPACE);
    TypedRegistry::new(ctx.registry.as_ref(), &namespace)
        .get::<StoredVpc>(key)
        .await?
        .ok_or_else(|| CloudError::not_found(ResourceKind::Vpc, key))
}

pub async fn list_vpcs(ctx: &KtContext) -> Result<Vec<StoredVpc>> {
    let namespace = ctx.namespace(NAMESPACE);
    TypedRegistry::new(ctx.registry.as_ref(), &namespace).list().await
}

pub struct KtVpcHandler {
    ctx: Arc<KtContext>,
}

impl KtVpcHandler {
    pub fn new(ctx: Arc<KtContext>) -> Self {
        Self { ctx }
    }

    async fn save(&self, vpc: &StoredVpc) -> Result<()> {
        let namespace = self.ctx.namespace(NAMESPACE);
        TypedRegistry::new(self.ctx.registry.as_ref(), &namespace)
            .put(&vpc.name, vpc)
            .await
    }

    fn subnet(&self, request: SubnetRequest) -> Result<StoredSubnet> {
        if request.name.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::Subnet, "name is required"));
        }
        Ok(StoredSubnet {
            name: request.name,
            zone: if request.zone.is_empty() {
                self.ctx.zone_id().to_string()
            } else {
                request.zone
            },
            ipv4_cidr: request.ipv4_cidr,
        })
    }

    async fn create(&self, request: VpcRequest) -> Result<VpcInfo> {
        if request.name.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::Vpc, "name is required"));
        }
        match load_vpc(&self.ctx, &ResourceRef::by_name(&request.name)).await {
            Ok(_) => return Err(CloudError::already_exists(ResourceKind::Vpc, &request.name)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut vpc = StoredVpc {
            name: request.name,
            ipv4_cidr: request.ipv4_cidr,
            subnets: Vec::with_capacity(request.subnets.len()),
        };
        for subnet in request.subnets {
            let subnet = self.subnet(subnet)?;
            if vpc.subnets.iter().any(|s| s.name == subnet.name) {
                return Err(CloudError::already_exists(ResourceKind::Subnet, subnet.name));
            }
            vpc.subnets.push(subnet);
        }
        self.save(&vpc).await?;
        tracing::info!(name = %vpc.name, subnets = vpc.subnets.len(), "vpc stored");
        Ok(vpc.info())
    }

    async fn add(&self, vpc: &ResourceRef, request: SubnetRequest) -> Result<VpcInfo> {
        let mut stored = load_vpc(&self.ctx, vpc).await?;
        let subnet = self.subnet(request)?;
        if stored.subnets.iter().any(|s| s.name == subnet.name) {
            return Err(CloudError::already_exists(ResourceKind::Subnet, subnet.name));
        }
        stored.subnets.push(subnet);
        self.save(&stored).await?;
        Ok(stored.info())
    }

    async fn remove(&self, vpc: &ResourceRef, subnet: &ResourceRef) -> Result<bool> {
        subnet.require(ResourceKind::Subnet)?;
        let mut stored = load_vpc(&self.ctx, vpc).await?;
        let Some(name) = stored.find_subnet(subnet).map(|s| s.name.clone()) else {
            return Err(CloudError::not_found(ResourceKind::Subnet, subnet.label()));
        };
        stored.subnets.retain(|s| s.name != name);
        self.save(&stored).await?;
        Ok(true)
    }
}

#[async_trait]
impl VpcHandler for KtVpcHandler {
    async fn create_vpc(&self, request: VpcRequest) -> Result<VpcInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, &request.name, "CreateVPC");
        timer.finish(self.create(request).await)
    }

    async fn list_vpc(&self) -> Result<Vec<VpcInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, "", "ListVPC");
        let vpcs = list_vpcs(&self.ctx)
            .await
            .map(|vpcs| vpcs.iter().map(StoredVpc::info).collect());
        timer.finish(vpcs)
    }

    async fn get_vpc(&self, vpc: &ResourceRef) -> Result<VpcInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, vpc.label(), "GetVPC");
        timer.finish(load_vpc(&self.ctx, vpc).await.map(|v| v.info()))
    }

    async fn delete_vpc(&self, vpc: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Vpc, vpc.label(), "DeleteVPC");
        let result = async {
            let key = vpc_key(vpc)?;
            let namespace = self.ctx.namespace(NAMESPACE);
            if !self.ctx.registry.delete(&namespace, key).await? {
                return Err(CloudError::not_found(ResourceKind::Vpc, key));
            }
            Ok(true)
        }
        .await;
        timer.finish(result)
    }

    async fn add_subnet(&self, vpc: &ResourceRef, subnet: SubnetRequest) -> Result<VpcInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Subnet, &subnet.name, "AddSubnet");
        timer.finish(self.add(vpc, subnet).await)
    }

    async fn remove_subnet(&self, vpc: &ResourceRef, subnet: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Subnet, subnet.label(), "RemoveSubnet");
        timer.finish(self.remove(vpc, subnet).await)
    }
}
