//! Tags on VMs and volumes

use crate::api::{Tag, TagArg, TagFilter, TagsRequest, USER_VM};
use crate::context::KtContext;
use crate::lookup::{VmLookup, VolumeLookup};
use crate::polling::{wait_for_cleanup_job, wait_for_job};
use async_trait::async_trait;
use cloudplug_core::model::{KeyValue, TagInfo};
use cloudplug_core::{CloudError, Iid, ResourceKind, ResourceRef, Resolver, Result, TagHandler};
use std::sync::Arc;

/// Resource type used when tagging volumes
pub const VOLUME: &str = "Volume";

fn resource_type(kind: ResourceKind) -> Result<&'static str> {
    match kind {
        ResourceKind::Vm => Ok(USER_VM),
        ResourceKind::Disk => Ok(VOLUME),
        other => Err(CloudError::not_supported(other, "tags")),
    }
}

/// Tags of one VM, or of every VM when `vm_id` is `None`.
pub async fn vm_tags(ctx: &KtContext, vm_id: Option<&str>) -> Result<Vec<Tag>> {
    list_tags(ctx, USER_VM, vm_id, None).await
}

async fn list_tags(
    ctx: &KtContext,
    resource_type: &str,
    resource_id: Option<&str>,
    key: Option<&str>,
) -> Result<Vec<Tag>> {
    let filter = TagFilter {
        resource_type: resource_type.to_string(),
        resource_id: resource_id.map(str::to_string),
        key: key.map(str::to_string),
    };
    ctx.call(
        ResourceKind::Tag,
        resource_id.unwrap_or_default(),
        "listTags",
        ctx.api.list_tags(&filter),
    )
    .await
}

/// Adds `tags` to a resource and waits for the job.
pub async fn create_tags(ctx: &KtContext, resource_type: &str, resource_id: &str, tags: Vec<TagArg>) -> Result<()> {
    let request = TagsRequest {
        resource_ids: vec![resource_id.to_string()],
        resource_type: resource_type.to_string(),
        tags,
    };
    let handle = ctx
        .call(ResourceKind::Tag, resource_id, "createTags", ctx.api.create_tags(&request))
        .await?;
    wait_for_job(ctx, ResourceKind::Tag, resource_id, &handle, ctx.presets.async_job).await
}

/// Removes tags from a resource. An empty `tags` removes all of them.
pub async fn delete_tags(ctx: &KtContext, resource_type: &str, resource_id: &str, tags: Vec<TagArg>) -> Result<()> {
    let request = TagsRequest {
        resource_ids: vec![resource_id.to_string()],
        resource_type: resource_type.to_string(),
        tags,
    };
    let handle = ctx
        .call(ResourceKind::Tag, resource_id, "deleteTags", ctx.api.delete_tags(&request))
        .await?;
    wait_for_cleanup_job(ctx, ResourceKind::Tag, resource_id, &handle, ctx.presets.async_job).await
}

fn key_value(tag: &Tag) -> KeyValue {
    KeyValue::new(
        tag.key.clone().unwrap_or_default(),
        tag.value.clone().unwrap_or_default(),
    )
}

pub struct KtTagHandler {
    ctx: Arc<KtContext>,
}

impl KtTagHandler {
    pub fn new(ctx: Arc<KtContext>) -> Self {
        Self { ctx }
    }

    async fn resolve(&self, kind: ResourceKind, resource: &ResourceRef) -> Result<Iid> {
        let ctx = &self.ctx;
        match kind {
            ResourceKind::Vm => Resolver::new().resolve_iid(&VmLookup(ctx), &ctx.scope, resource).await,
            ResourceKind::Disk => {
                Resolver::new()
                    .resolve_iid(&VolumeLookup(ctx), &ctx.scope, resource)
                    .await
            }
            other => Err(CloudError::not_supported(other, "tags")),
        }
    }

    async fn value_of(&self, kind: ResourceKind, resource_id: &str, key: &str) -> Result<KeyValue> {
        list_tags(&self.ctx, resource_type(kind)?, Some(resource_id), Some(key))
            .await?
            .iter()
            .find(|t| t.key.as_deref() == Some(key))
            .map(key_value)
            .ok_or_else(|| CloudError::not_found(ResourceKind::Tag, format!("{}/{}", resource_id, key)))
    }

    async fn add(&self, kind: ResourceKind, resource: &ResourceRef, tag: KeyValue) -> Result<KeyValue> {
        let resource_type = resource_type(kind)?;
        if tag.key.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::Tag, "tag key is required"));
        }
        let iid = self.resolve(kind, resource).await?;
        create_tags(
            &self.ctx,
            resource_type,
            &iid.system_id,
            vec![TagArg::new(&tag.key, &tag.value)],
        )
        .await?;
        self.value_of(kind, &iid.system_id, &tag.key).await
    }

    async fn remove(&self, kind: ResourceKind, resource: &ResourceRef, key: &str) -> Result<bool> {
        let resource_type = resource_type(kind)?;
        if key.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::Tag, "tag key is required"));
        }
        let iid = self.resolve(kind, resource).await?;
        let current = self.value_of(kind, &iid.system_id, key).await?;
        delete_tags(
            &self.ctx,
            resource_type,
            &iid.system_id,
            vec![TagArg::new(current.key, current.value)],
        )
        .await?;
        Ok(true)
    }

    /// Tags of `kind` whose key or value contains `keyword`, one entry per tag.
    pub async fn find_tags(&self, kind: ResourceKind, keyword: &str) -> Result<Vec<TagInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Tag, keyword, "FindTag");
        let result = async {
            if keyword.is_empty() {
                return Err(CloudError::validation(ResourceKind::Tag, "keyword is required"));
            }
            let tags = list_tags(&self.ctx, resource_type(kind)?, None, None).await?;
            Ok(tags
                .iter()
                .filter(|t| {
                    t.key.as_deref().unwrap_or_default().contains(keyword)
                        || t.value.as_deref().unwrap_or_default().contains(keyword)
                })
                .map(|t| TagInfo {
                    resource_kind: kind,
                    resource: Iid::new("", t.resourceid.clone().unwrap_or_default()),
                    tags: vec![key_value(t)],
                    key_values: Vec::new(),
                })
                .collect())
        }
        .await;
        timer.finish(result)
    }
}

#[async_trait]
impl TagHandler for KtTagHandler {
    async fn add_tag(&self, kind: ResourceKind, resource: &ResourceRef, tag: KeyValue) -> Result<KeyValue> {
        let timer = self.ctx.calls.start(ResourceKind::Tag, resource.label(), "AddTag");
        timer.finish(self.add(kind, resource, tag).await)
    }

    async fn list_tag(&self, kind: ResourceKind, resource: &ResourceRef) -> Result<Vec<KeyValue>> {
        let timer = self.ctx.calls.start(ResourceKind::Tag, resource.label(), "ListTag");
        let result = async {
            let resource_type = resource_type(kind)?;
            let iid = self.resolve(kind, resource).await?;
            let tags = list_tags(&self.ctx, resource_type, Some(&iid.system_id), None).await?;
            Ok(tags.iter().map(key_value).collect())
        }
        .await;
        timer.finish(result)
    }

    async fn get_tag(&self, kind: ResourceKind, resource: &ResourceRef, key: &str) -> Result<KeyValue> {
        let timer = self.ctx.calls.start(ResourceKind::Tag, resource.label(), "GetTag");
        let result = async {
            resource_type(kind)?;
            let iid = self.resolve(kind, resource).await?;
            self.value_of(kind, &iid.system_id, key).await
        }
        .await;
        timer.finish(result)
    }

    async fn remove_tag(&self, kind: ResourceKind, resource: &ResourceRef, key: &str) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Tag, resource.label(), "RemoveTag");
        timer.finish(self.remove(kind, resource, key).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::VirtualMachine;
    use crate::fake::FakeKtCloud;
    use cloudplug_core::Scope;

    fn handler(fake: Arc<FakeKtCloud>) -> KtTagHandler {
        let ctx = KtContext::new(fake, Scope::zone("KR", "kr-0")).unwrap();
        KtTagHandler::new(Arc::new(ctx))
    }

    fn fake_with_vm() -> Arc<FakeKtCloud> {
        Arc::new(FakeKtCloud::new().with_vm(VirtualMachine {
            id: Some("vm-1".into()),
            name: Some("web-1".into()),
            zoneid: Some("kr-0".into()),
            state: Some("Running".into()),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_tag_lifecycle_on_vm() {
        let fake = fake_with_vm();
        let h = handler(fake.clone());
        let vm = ResourceRef::by_name("web-1");

        let added = h
            .add_tag(ResourceKind::Vm, &vm, KeyValue::new("env", "prod"))
            .await
            .unwrap();
        assert_eq!(added, KeyValue::new("env", "prod"));
        assert_eq!(h.list_tag(ResourceKind::Vm, &vm).await.unwrap().len(), 1);
        assert_eq!(
            h.get_tag(ResourceKind::Vm, &ResourceRef::by_id("vm-1"), "env")
                .await
                .unwrap()
                .value,
            "prod"
        );

        assert!(h.remove_tag(ResourceKind::Vm, &vm, "env").await.unwrap());
        assert!(fake.tags().is_empty());
        let err = h.get_tag(ResourceKind::Vm, &vm, "env").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_find_tags_by_keyword() {
        let fake = fake_with_vm();
        let h = handler(fake.clone());
        let vm = ResourceRef::by_id("vm-1");
        h.add_tag(ResourceKind::Vm, &vm, KeyValue::new("env", "production"))
            .await
            .unwrap();
        h.add_tag(ResourceKind::Vm, &vm, KeyValue::new("team", "infra"))
            .await
            .unwrap();

        let found = h.find_tags(ResourceKind::Vm, "prod").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resource.system_id, "vm-1");
        assert_eq!(found[0].tags[0].key, "env");
    }

    #[tokio::test]
    async fn test_unsupported_kind_makes_no_calls() {
        let fake = fake_with_vm();
        let h = handler(fake.clone());
        let err = h
            .add_tag(ResourceKind::Vpc, &ResourceRef::by_name("vpc-a"), KeyValue::new("k", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NotSupported { kind: ResourceKind::Vpc, .. }));
        assert!(fake.calls().is_empty());
    }
}
