//! Security groups
//!
//! KT Cloud has no security-group object. Groups live in the local resource
//! registry and their inbound rules are applied to a VM's public IP when the
//! VM is started.

use crate::context::KtContext;
use async_trait::async_trait;
use cloudplug_core::model::{KeyValue, SecurityGroupInfo, SecurityGroupRequest, SecurityRule};
use cloudplug_core::{
    CloudError, Iid, RegistryRecord, ResourceKind, ResourceRef, Result, SecurityHandler,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const NAMESPACE: &str = "security-group";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSecurityGroup {
    pub name: String,
    #[serde(default)]
    pub vpc: String,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

impl StoredSecurityGroup {
    fn info(&self, record: &RegistryRecord) -> SecurityGroupInfo {
        SecurityGroupInfo {
            iid: Iid::new(&self.name, &self.name),
            vpc: Iid::new(&self.vpc, &self.vpc),
            rules: self.rules.clone(),
            key_values: vec![KeyValue::new("CreatedTime", record.created_at.to_rfc3339())],
        }
    }
}

/// Group names double as ids.
fn group_key(group: &ResourceRef) -> Result<&str> {
    group.require(ResourceKind::SecurityGroup)?;
    Ok(group.system_id().or(group.name()).unwrap_or_default())
}

pub async fn load_group(ctx: &KtContext, group: &ResourceRef) -> Result<(StoredSecurityGroup, RegistryRecord)> {
    let key = group_key(group)?;
    let record = ctx
        .registry
        .get(&ctx.namespace(NAMESPACE), key)
        .await?
        .ok_or_else(|| CloudError::not_found(ResourceKind::SecurityGroup, key))?;
    Ok((record.decode()?, record))
}

pub async fn list_groups(ctx: &KtContext) -> Result<Vec<(StoredSecurityGroup, RegistryRecord)>> {
    let records = ctx.registry.list(&ctx.namespace(NAMESPACE)).await?;
    records
        .into_iter()
        .map(|r| Ok((r.decode()?, r)))
        .collect()
}

async fn store_group(ctx: &KtContext, group: &StoredSecurityGroup) -> Result<()> {
    ctx.registry
        .put(&ctx.namespace(NAMESPACE), &group.name, serde_json::to_value(group)?)
        .await
}

pub struct KtSecurityHandler {
    ctx: Arc<KtContext>,
}

impl KtSecurityHandler {
    pub fn new(ctx: Arc<KtContext>) -> Self {
        Self { ctx }
    }

    async fn create(&self, request: SecurityGroupRequest) -> Result<SecurityGroupInfo> {
        if request.name.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::SecurityGroup, "name is required"));
        }
        let namespace = self.ctx.namespace(NAMESPACE);
        if self.ctx.registry.get(&namespace, &request.name).await?.is_some() {
            return Err(CloudError::already_exists(ResourceKind::SecurityGroup, &request.name));
        }

        let group = StoredSecurityGroup {
            name: request.name.clone(),
            vpc: request
                .vpc
                .name()
                .or(request.vpc.system_id())
                .unwrap_or_default()
                .to_string(),
            rules: request.rules,
        };
        store_group(&self.ctx, &group).await?;
        tracing::info!(name = %group.name, rules = group.rules.len(), "security group stored");

        let (group, record) = load_group(&self.ctx, &ResourceRef::by_name(&group.name)).await?;
        Ok(group.info(&record))
    }

    async fn update_rules<F>(&self, group: &ResourceRef, update: F) -> Result<SecurityGroupInfo>
    where
        F: FnOnce(&mut Vec<SecurityRule>),
    {
        let (mut stored, _) = load_group(&self.ctx, group).await?;
        update(&mut stored.rules);
        store_group(&self.ctx, &stored).await?;
        let (stored, record) = load_group(&self.ctx, group).await?;
        Ok(stored.info(&record))
    }
}

#[async_trait]
impl SecurityHandler for KtSecurityHandler {
    async fn create_security(&self, request: SecurityGroupRequest) -> Result<SecurityGroupInfo> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, &request.name, "CreateSecurity");
        timer.finish(self.create(request).await)
    }

    async fn list_security(&self) -> Result<Vec<SecurityGroupInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, "", "ListSecurity");
        let groups = list_groups(&self.ctx)
            .await
            .map(|groups| groups.iter().map(|(g, r)| g.info(r)).collect());
        timer.finish(groups)
    }

    async fn get_security(&self, group: &ResourceRef) -> Result<SecurityGroupInfo> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, group.label(), "GetSecurity");
        let info = load_group(&self.ctx, group).await.map(|(g, r)| g.info(&r));
        timer.finish(info)
    }

    async fn delete_security(&self, group: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, group.label(), "DeleteSecurity");
        let result = async {
            let key = group_key(group)?;
            if !self.ctx.registry.delete(&self.ctx.namespace(NAMESPACE), key).await? {
                return Err(CloudError::not_found(ResourceKind::SecurityGroup, key));
            }
            Ok(true)
        }
        .await;
        timer.finish(result)
    }

    async fn add_rules(&self, group: &ResourceRef, rules: &[SecurityRule]) -> Result<SecurityGroupInfo> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, group.label(), "AddRules");
        let result = self
            .update_rules(group, |current| {
                for rule in rules {
                    if !current.contains(rule) {
                        current.push(rule.clone());
                    }
                }
            })
            .await;
        timer.finish(result)
    }

    async fn remove_rules(&self, group: &ResourceRef, rules: &[SecurityRule]) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, group.label(), "RemoveRules");
        let result = async {
            let (stored, _) = load_group(&self.ctx, group).await?;
            if let Some(missing) = rules.iter().find(|r| !stored.rules.contains(r)) {
                return Err(CloudError::validation(
                    ResourceKind::SecurityGroup,
                    format!(
                        "rule {} {}:{}-{} is not in group '{}'",
                        missing.direction, missing.ip_protocol, missing.from_port, missing.to_port, stored.name
                    ),
                ));
            }
            self.update_rules(group, |current| current.retain(|r| !rules.contains(r)))
                .await?;
            Ok(true)
        }
        .await;
        timer.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeKtCloud;
    use cloudplug_core::Scope;

    fn handler() -> KtSecurityHandler {
        let ctx = KtContext::new(Arc::new(FakeKtCloud::new()), Scope::zone("KR", "kr-0")).unwrap();
        KtSecurityHandler::new(Arc::new(ctx))
    }

    fn request(name: &str) -> SecurityGroupRequest {
        SecurityGroupRequest {
            name: name.into(),
            vpc: ResourceRef::by_name("vpc-a"),
            rules: vec![SecurityRule::inbound("tcp", "22", "22", "")],
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let h = handler();
        let created = h.create_security(request("sg-web")).await.unwrap();
        assert_eq!(created.iid, Iid::new("sg-web", "sg-web"));
        assert_eq!(created.vpc.name_id, "vpc-a");

        let by_id = h.get_security(&ResourceRef::by_id("sg-web")).await.unwrap();
        assert_eq!(by_id.rules, created.rules);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let h = handler();
        h.create_security(request("sg-web")).await.unwrap();
        let err = h.create_security(request("sg-web")).await.unwrap_err();
        assert!(matches!(err, CloudError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_add_and_remove_rules() {
        let h = handler();
        h.create_security(request("sg-web")).await.unwrap();
        let group = ResourceRef::by_name("sg-web");

        let http = SecurityRule::inbound("tcp", "80", "80", "");
        let info = h.add_rules(&group, &[http.clone(), http.clone()]).await.unwrap();
        assert_eq!(info.rules.len(), 2);

        assert!(h.remove_rules(&group, &[http.clone()]).await.unwrap());
        let err = h.remove_rules(&group, &[http]).await.unwrap_err();
        assert!(matches!(err, CloudError::Validation { .. }));
        assert_eq!(h.get_security(&group).await.unwrap().rules.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_group() {
        let h = handler();
        let err = h.delete_security(&ResourceRef::by_name("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
