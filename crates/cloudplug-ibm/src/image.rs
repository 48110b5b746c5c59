//! Public OS images, read from the product catalog

use crate::context::IbmContext;
use crate::lookup::OsImageLookup;
use crate::mapper;
use async_trait::async_trait;
use cloudplug_core::model::ImageInfo;
use cloudplug_core::{CloudError, ImageHandler, Lookup, ResourceKind, ResourceRef, Resolver, Result};
use std::sync::Arc;

pub struct IbmImageHandler {
    ctx: Arc<IbmContext>,
}

impl IbmImageHandler {
    pub fn new(ctx: Arc<IbmContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ImageHandler for IbmImageHandler {
    async fn list_image(&self) -> Result<Vec<ImageInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::Image, "", "ListImage");
        let images = OsImageLookup(&self.ctx)
            .list(&self.ctx.scope)
            .await
            .map(|items| items.iter().map(mapper::map_image).collect());
        timer.finish(images)
    }

    async fn get_image(&self, image: &ResourceRef) -> Result<ImageInfo> {
        let timer = self.ctx.calls.start(ResourceKind::Image, image.label(), "GetImage");
        let info = Resolver::new()
            .resolve(&OsImageLookup(&self.ctx), &self.ctx.scope, image)
            .await
            .map(|r| mapper::map_image(&r.resource));
        timer.finish(info)
    }

    async fn delete_image(&self, image: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::Image, image.label(), "DeleteImage");
        timer.finish(Err(CloudError::not_supported(ResourceKind::Image, "DeleteImage")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSoftLayer;
    use cloudplug_core::Scope;

    fn handler() -> IbmImageHandler {
        let fake = FakeSoftLayer::seeded().with_os_image(42, "OS_CENTOS_7_X_64_BIT", "CENTOS_7_64");
        let ctx = IbmContext::new(Arc::new(fake), Scope::region("dal10")).unwrap();
        IbmImageHandler::new(Arc::new(ctx))
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let h = handler();
        let images = h.list_image().await.unwrap();
        assert_eq!(images.len(), 2);

        let centos = h.get_image(&ResourceRef::by_id("42")).await.unwrap();
        assert_eq!(centos.iid.name_id, "OS_CENTOS_7_X_64_BIT");
        assert_eq!(centos.guest_os, "CENTOS 7 64");
    }

    #[tokio::test]
    async fn test_unknown_image() {
        let err = handler().get_image(&ResourceRef::by_name("OS_NONE")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_not_supported() {
        let err = handler()
            .delete_image(&ResourceRef::by_name("OS_CENTOS_7_X_64_BIT"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NotSupported { .. }));
    }
}
