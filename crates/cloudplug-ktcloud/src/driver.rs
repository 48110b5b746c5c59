//! KT Cloud driver connection

use crate::api::KtCloudApi;
use crate::context::KtContext;
use crate::disk::KtDiskHandler;
use crate::image::KtImageHandler;
use crate::keypair::{KtKeyPairHandler, PublicKeyDeriver, SshKeygen};
use crate::nlb::KtNlbHandler;
use crate::security::KtSecurityHandler;
use crate::tag::KtTagHandler;
use crate::vm::KtVmHandler;
use crate::vmspec::KtVmSpecHandler;
use crate::vpc::KtVpcHandler;
use cloudplug_core::{
    CloudDriver, DiskHandler, DriverCapabilities, ImageHandler, KeyPairHandler, NlbHandler, Result,
    Scope, SecurityHandler, TagHandler, VmHandler, VmSpecHandler, VpcHandler,
};
use std::sync::Arc;

/// KT Cloud driver
///
/// Every handler it hands out shares one [`KtContext`], so they see the
/// same registry, call logger and cancellation token.
pub struct KtCloudDriver {
    ctx: Arc<KtContext>,
    deriver: Arc<dyn PublicKeyDeriver>,
}

impl KtCloudDriver {
    /// Connects to `scope` with the default collaborators.
    pub fn connect(api: Arc<dyn KtCloudApi>, scope: Scope) -> Result<Self> {
        Ok(Self::new(KtContext::new(api, scope)?))
    }

    pub fn new(ctx: KtContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            deriver: Arc::new(SshKeygen::new()),
        }
    }

    pub fn with_key_deriver(mut self, deriver: Arc<dyn PublicKeyDeriver>) -> Self {
        self.deriver = deriver;
        self
    }

    pub fn context(&self) -> &KtContext {
        &self.ctx
    }
}

impl CloudDriver for KtCloudDriver {
    fn name(&self) -> &str {
        "ktcloud"
    }

    fn display_name(&self) -> &str {
        "KT Cloud"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            vm: true,
            disk: true,
            key_pair: true,
            security: true,
            vpc: true,
            image: true,
            tag: true,
            nlb: true,
            file_system: false,
            vm_spec: true,
        }
    }

    fn vm_handler(&self) -> Result<Arc<dyn VmHandler>> {
        Ok(Arc::new(KtVmHandler::new(Arc::clone(&self.ctx))))
    }

    fn disk_handler(&self) -> Result<Arc<dyn DiskHandler>> {
        Ok(Arc::new(KtDiskHandler::new(Arc::clone(&self.ctx))))
    }

    fn key_pair_handler(&self) -> Result<Arc<dyn KeyPairHandler>> {
        Ok(Arc::new(KtKeyPairHandler::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.deriver),
        )))
    }

    fn security_handler(&self) -> Result<Arc<dyn SecurityHandler>> {
        Ok(Arc::new(KtSecurityHandler::new(Arc::clone(&self.ctx))))
    }

    fn vpc_handler(&self) -> Result<Arc<dyn VpcHandler>> {
        Ok(Arc::new(KtVpcHandler::new(Arc::clone(&self.ctx))))
    }

    fn image_handler(&self) -> Result<Arc<dyn ImageHandler>> {
        Ok(Arc::new(KtImageHandler::new(Arc::clone(&self.ctx))))
    }

    fn tag_handler(&self) -> Result<Arc<dyn TagHandler>> {
        Ok(Arc::new(KtTagHandler::new(Arc::clone(&self.ctx))))
    }

    fn nlb_handler(&self) -> Result<Arc<dyn NlbHandler>> {
        Ok(Arc::new(KtNlbHandler::new(Arc::clone(&self.ctx))))
    }

    fn vm_spec_handler(&self) -> Result<Arc<dyn VmSpecHandler>> {
        Ok(Arc::new(KtVmSpecHandler::new(Arc::clone(&self.ctx))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeKtCloud;
    use cloudplug_core::CloudError;

    #[test]
    fn test_driver_handlers() {
        let driver = KtCloudDriver::connect(Arc::new(FakeKtCloud::new()), Scope::zone("KR", "kr-0")).unwrap();
        assert_eq!(driver.name(), "ktcloud");
        let caps = driver.capabilities();
        assert!(caps.vm && caps.disk && caps.tag && caps.nlb && caps.vm_spec);
        assert!(!caps.file_system);
        assert!(driver.vm_handler().is_ok());
        assert!(driver.tag_handler().is_ok());
        assert!(driver.nlb_handler().is_ok());
        assert!(matches!(driver.file_system_handler(), Err(CloudError::NotSupported { .. })));
        assert_eq!(driver.context().zone_id(), "kr-0");
    }

    #[test]
    fn test_connect_without_zone_fails() {
        let result = KtCloudDriver::connect(Arc::new(FakeKtCloud::new()), Scope::region("KR"));
        assert!(matches!(result, Err(CloudError::Validation { .. })));
    }
}
