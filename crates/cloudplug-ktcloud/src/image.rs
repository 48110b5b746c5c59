//! Templates as images

use crate::context::KtContext;
use crate::lookup::TemplateLookup;
use crate::mapper;
use async_trait::async_trait;
use cloudplug_core::model::ImageInfo;
use cloudplug_core::{CloudError, ImageHandler, Lookup, ResourceKind, ResourceRef, Resolver, Result};
use std::sync::Arc;

pub struct KtImageHandler {
    ctx: Arc<KtContext>,
}

impl KtImageHandler {
    pub fn new(ctx: Arc<KtContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ImageHandler for KtImageHandler {
    async fn list_image(&self) -> Result<Vec<ImageInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Image, "", "ListImage");
        let images = TemplateLookup(&self.ctx)
            .list(&self.ctx.scope)
            .await
            .map(|templates| templates.iter().map(mapper::map_image).collect());
        timer.finish(images)
    }

    async fn get_image(&self, image: &ResourceRef) -> Result<ImageInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Image, image.label(), "GetImage");
        let image = Resolver::new()
            .resolve(&TemplateLookup(&self.ctx), &self.ctx.scope, image)
            .await
            .map(|found| mapper::map_image(&found.resource));
        timer.finish(image)
    }

    async fn delete_image(&self, image: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Image, image.label(), "DeleteImage");
        timer.finish(Err(CloudError::not_supported(ResourceKind::Image, "delete_image")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeKtCloud;
    use cloudplug_core::Scope;

    fn handler() -> KtImageHandler {
        let fake = FakeKtCloud::seeded().with_template("tmpl-centos", "CentOS 7.8 64bit");
        let ctx = KtContext::new(Arc::new(fake), Scope::zone("KR", "kr-0")).unwrap();
        KtImageHandler::new(Arc::new(ctx))
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let h = handler();
        assert_eq!(h.list_image().await.unwrap().len(), 2);

        let by_name = h.get_image(&ResourceRef::by_name("Ubuntu 22.04 64bit")).await.unwrap();
        let by_id = h.get_image(&ResourceRef::by_id("tmpl-ubuntu")).await.unwrap();
        assert_eq!(by_name.iid, by_id.iid);

        let err = h.get_image(&ResourceRef::by_id("tmpl-none")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_not_supported() {
        let err = handler()
            .delete_image(&ResourceRef::by_id("tmpl-ubuntu"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NotSupported { kind: ResourceKind::Image, .. }));
    }
}
