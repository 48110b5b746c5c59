//! Security groups
//!
//! SoftLayer security groups are account wide, so the VPC of a request is
//! accepted and ignored. Rules are converted before anything is created;
//! a group whose rules cannot be added is deleted again.

use crate::api::{SecurityGroup, SecurityGroupRule};
use crate::context::IbmContext;
use crate::lookup::SecurityGroupLookup;
use crate::mapper::{self, same_rule, to_vendor_rule};
use async_trait::async_trait;
use cloudplug_core::model::{SecurityGroupInfo, SecurityGroupRequest, SecurityRule};
use cloudplug_core::{
    CloudError, Compensation, Lookup, ResourceKind, ResourceRef, Resolver, Result, Saga,
    SecurityHandler, ensure_absent,
};
use futures_util::FutureExt;
use std::sync::Arc;

fn vendor_rules(rules: &[SecurityRule]) -> Result<Vec<SecurityGroupRule>> {
    rules.iter().map(to_vendor_rule).collect()
}

fn delete_group(ctx: Arc<IbmContext>, group_id: i64) -> Compensation {
    async move {
        ctx.call(
            ResourceKind::SecurityGroup,
            &group_id.to_string(),
            "deleteSecurityGroup",
            ctx.api.delete_security_group(group_id),
        )
        .await?;
        Ok(())
    }
    .boxed()
}

pub struct IbmSecurityHandler {
    ctx: Arc<IbmContext>,
}

impl IbmSecurityHandler {
    pub fn new(ctx: Arc<IbmContext>) -> Self {
        Self { ctx }
    }

    async fn resolve(&self, group: &ResourceRef) -> Result<SecurityGroup> {
        Ok(Resolver::new()
            .resolve(&SecurityGroupLookup(&self.ctx), &self.ctx.scope, group)
            .await?
            .resource)
    }

    async fn reload(&self, group_id: i64) -> Result<SecurityGroup> {
        SecurityGroupLookup(&self.ctx)
            .fetch_by_id(&self.ctx.scope, &group_id.to_string())
            .await?
            .ok_or_else(|| CloudError::not_found(ResourceKind::SecurityGroup, group_id.to_string()))
    }

    async fn create(&self, request: SecurityGroupRequest) -> Result<SecurityGroupInfo> {
        let ctx = &self.ctx;
        if request.name.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::SecurityGroup, "name is required"));
        }
        let rules = vendor_rules(&request.rules)?;
        ensure_absent(&SecurityGroupLookup(ctx), &ctx.scope, &request.name).await?;

        let mut saga = Saga::new("create-security-group").with_cancellation(ctx.cancel.clone());
        let group_id = saga
            .execute_with_undo(
                "create-security-group",
                async {
                    let group = ctx
                        .call(
                            ResourceKind::SecurityGroup,
                            &request.name,
                            "createSecurityGroup",
                            ctx.api.create_security_group(&request.name, ""),
                        )
                        .await?;
                    group.id.ok_or_else(|| {
                        CloudError::provider(
                            ResourceKind::SecurityGroup,
                            &request.name,
                            "createSecurityGroup",
                            "no group id returned",
                        )
                    })
                },
                |group_id: &i64| delete_group(Arc::clone(&self.ctx), *group_id),
            )
            .await?;

        if !rules.is_empty() {
            saga.execute(
                "add-rules",
                ctx.call(
                    ResourceKind::SecurityGroup,
                    &request.name,
                    "addRules",
                    ctx.api.add_security_group_rules(group_id, &rules),
                ),
            )
            .await?;
        }

        let group = saga.execute("describe-security-group", self.reload(group_id)).await?;
        saga.commit();
        tracing::info!(name = %request.name, group_id, rules = rules.len(), "security group created");
        Ok(mapper::map_security_group(&group))
    }

    async fn delete(&self, group: &ResourceRef) -> Result<bool> {
        let ctx = &self.ctx;
        let found = self.resolve(group).await?;
        let group_id = found.id.unwrap_or_default();
        ctx.call(
            ResourceKind::SecurityGroup,
            &group_id.to_string(),
            "deleteSecurityGroup",
            ctx.api.delete_security_group(group_id),
        )
        .await
    }

    async fn add(&self, group: &ResourceRef, rules: &[SecurityRule]) -> Result<SecurityGroupInfo> {
        let ctx = &self.ctx;
        let wanted = vendor_rules(rules)?;
        let found = self.resolve(group).await?;
        let group_id = found.id.unwrap_or_default();

        let mut missing: Vec<SecurityGroupRule> = Vec::new();
        for rule in wanted {
            let present = found.rules.iter().chain(missing.iter()).any(|r| same_rule(r, &rule));
            if !present {
                missing.push(rule);
            }
        }
        if missing.is_empty() {
            tracing::debug!(group_id, "every rule is already present");
            return Ok(mapper::map_security_group(&found));
        }

        ctx.call(
            ResourceKind::SecurityGroup,
            &group_id.to_string(),
            "addRules",
            ctx.api.add_security_group_rules(group_id, &missing),
        )
        .await?;
        Ok(mapper::map_security_group(&self.reload(group_id).await?))
    }

    async fn remove(&self, group: &ResourceRef, rules: &[SecurityRule]) -> Result<bool> {
        let ctx = &self.ctx;
        let wanted = vendor_rules(rules)?;
        let found = self.resolve(group).await?;
        let group_id = found.id.unwrap_or_default();

        let mut rule_ids = Vec::with_capacity(wanted.len());
        for (rule, original) in wanted.iter().zip(rules) {
            let existing = found
                .rules
                .iter()
                .find(|r| same_rule(r, rule))
                .and_then(|r| r.id)
                .ok_or_else(|| {
                    CloudError::validation(
                        ResourceKind::SecurityGroup,
                        format!(
                            "rule {} {}:{}-{} is not in group '{}'",
                            original.direction,
                            original.ip_protocol,
                            original.from_port,
                            original.to_port,
                            found.name.as_deref().unwrap_or_default()
                        ),
                    )
                })?;
            if !rule_ids.contains(&existing) {
                rule_ids.push(existing);
            }
        }

        ctx.call(
            ResourceKind::SecurityGroup,
            &group_id.to_string(),
            "removeRules",
            ctx.api.remove_security_group_rules(group_id, &rule_ids),
        )
        .await
    }
}

#[async_trait]
impl SecurityHandler for IbmSecurityHandler {
    async fn create_security(&self, request: SecurityGroupRequest) -> Result<SecurityGroupInfo> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, &request.name, "CreateSecurity");
        timer.finish(self.create(request).await)
    }

    async fn list_security(&self) -> Result<Vec<SecurityGroupInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, "", "ListSecurity");
        let groups = SecurityGroupLookup(&self.ctx)
            .list(&self.ctx.scope)
            .await
            .map(|groups| groups.iter().map(mapper::map_security_group).collect());
        timer.finish(groups)
    }

    async fn get_security(&self, group: &ResourceRef) -> Result<SecurityGroupInfo> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, group.label(), "GetSecurity");
        let info = self.resolve(group).await.map(|g| mapper::map_security_group(&g));
        timer.finish(info)
    }

    async fn delete_security(&self, group: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, group.label(), "DeleteSecurity");
        timer.finish(self.delete(group).await)
    }

    async fn add_rules(&self, group: &ResourceRef, rules: &[SecurityRule]) -> Result<SecurityGroupInfo> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, group.label(), "AddRules");
        timer.finish(self.add(group, rules).await)
    }

    async fn remove_rules(&self, group: &ResourceRef, rules: &[SecurityRule]) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::SecurityGroup, group.label(), "RemoveRules");
        timer.finish(self.remove(group, rules).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSoftLayer;
    use cloudplug_core::Scope;

    fn handler(fake: Arc<FakeSoftLayer>) -> IbmSecurityHandler {
        let ctx = IbmContext::new(fake, Scope::region("dal10")).unwrap();
        IbmSecurityHandler::new(Arc::new(ctx))
    }

    fn request(name: &str) -> SecurityGroupRequest {
        SecurityGroupRequest {
            name: name.into(),
            vpc: ResourceRef::by_name("ignored"),
            rules: vec![
                SecurityRule::inbound("tcp", "22", "22", ""),
                SecurityRule::outbound("all", "-1", "-1", ""),
            ],
        }
    }

    #[tokio::test]
    async fn test_create_maps_rules_back() {
        let fake = Arc::new(FakeSoftLayer::seeded());
        let h = handler(fake.clone());

        let info = h.create_security(request("sg-web")).await.unwrap();
        assert_eq!(info.iid.name_id, "sg-web");
        assert!(info.vpc.name_id.is_empty());
        assert_eq!(info.rules.len(), 2);
        assert_eq!(info.rules[0], SecurityRule::inbound("tcp", "22", "22", "0.0.0.0/0"));
        assert_eq!(info.rules[1].ip_protocol, "all");
        assert_eq!(fake.call_count("addRules"), 1);
    }

    #[tokio::test]
    async fn test_invalid_rule_creates_nothing() {
        let fake = Arc::new(FakeSoftLayer::seeded());
        let h = handler(fake.clone());
        let mut req = request("sg-web");
        req.rules.push(SecurityRule::inbound("tcp", "0", "70000", ""));

        let err = h.create_security(req).await.unwrap_err();
        assert!(matches!(err, CloudError::Validation { .. }));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let fake = Arc::new(FakeSoftLayer::seeded());
        let h = handler(fake.clone());
        h.create_security(request("sg-web")).await.unwrap();

        let err = h.create_security(request("sg-web")).await.unwrap_err();
        assert!(matches!(err, CloudError::AlreadyExists { .. }));
        assert_eq!(fake.call_count("createSecurityGroup"), 1);
    }

    #[tokio::test]
    async fn test_add_rules_skips_existing() {
        let fake = Arc::new(FakeSoftLayer::seeded());
        let h = handler(fake.clone());
        h.create_security(request("sg-web")).await.unwrap();
        let group = ResourceRef::by_name("sg-web");

        let ssh = SecurityRule::inbound("tcp", "22", "22", "0.0.0.0/0");
        let http = SecurityRule::inbound("tcp", "80", "80", "");
        let info = h.add_rules(&group, &[ssh.clone(), http.clone(), http]).await.unwrap();
        assert_eq!(info.rules.len(), 3);
        assert_eq!(fake.call_count("addRules"), 2);

        let info = h.add_rules(&group, &[ssh]).await.unwrap();
        assert_eq!(info.rules.len(), 3);
        assert_eq!(fake.call_count("addRules"), 2);
    }

    #[tokio::test]
    async fn test_remove_rules() {
        let fake = Arc::new(FakeSoftLayer::seeded());
        let h = handler(fake.clone());
        h.create_security(request("sg-web")).await.unwrap();
        let group = ResourceRef::by_name("sg-web");

        let ssh = SecurityRule::inbound("tcp", "22", "22", "");
        assert!(h.remove_rules(&group, &[ssh.clone()]).await.unwrap());
        assert_eq!(h.get_security(&group).await.unwrap().rules.len(), 1);

        let err = h.remove_rules(&group, &[ssh]).await.unwrap_err();
        assert!(matches!(err, CloudError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let fake = Arc::new(FakeSoftLayer::seeded());
        let h = handler(fake.clone());
        let info = h.create_security(request("sg-web")).await.unwrap();

        assert!(h.delete_security(&ResourceRef::by_id(&info.iid.system_id)).await.unwrap());
        assert!(fake.security_groups().is_empty());
        let err = h.get_security(&ResourceRef::by_name("sg-web")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
