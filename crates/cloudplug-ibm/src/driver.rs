//! IBM Cloud (SoftLayer) driver connection

use crate::api::SoftLayerApi;
use crate::context::IbmContext;
use crate::filesystem::IbmFileSystemHandler;
use crate::image::IbmImageHandler;
use crate::keypair::{IbmKeyPairHandler, KeyGenerator, SshKeygenGenerator};
use crate::security::IbmSecurityHandler;
use crate::vm::IbmVmHandler;
use crate::vmspec::IbmVmSpecHandler;
use crate::vpc::IbmVpcHandler;
use cloudplug_core::{
    CloudDriver, DriverCapabilities, FileSystemHandler, ImageHandler, KeyPairHandler, Result, Scope,
    SecurityHandler, VmHandler, VmSpecHandler, VpcHandler,
};
use std::sync::Arc;

/// SoftLayer driver. Disks, NLBs and tags are not offered.
pub struct IbmDriver {
    ctx: Arc<IbmContext>,
    generator: Arc<dyn KeyGenerator>,
}

impl IbmDriver {
    /// Connects to the datacenter named by `scope.region`.
    pub fn connect(api: Arc<dyn SoftLayerApi>, scope: Scope) -> Result<Self> {
        Ok(Self::new(IbmContext::new(api, scope)?))
    }

    pub fn new(ctx: IbmContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            generator: Arc::new(SshKeygenGenerator::new()),
        }
    }

    pub fn with_key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn context(&self) -> &IbmContext {
        &self.ctx
    }
}

impl CloudDriver for IbmDriver {
    fn name(&self) -> &str {
        "ibm"
    }

    fn display_name(&self) -> &str {
        "IBM Cloud (SoftLayer)"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            vm: true,
            disk: false,
            key_pair: true,
            security: true,
            vpc: true,
            image: true,
            tag: false,
            nlb: false,
            file_system: true,
            vm_spec: true,
        }
    }

    fn vm_handler(&self) -> Result<Arc<dyn VmHandler>> {
        Ok(Arc::new(IbmVmHandler::new(Arc::clone(&self.ctx))))
    }

    fn key_pair_handler(&self) -> Result<Arc<dyn KeyPairHandler>> {
        Ok(Arc::new(IbmKeyPairHandler::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.generator),
        )))
    }

    fn security_handler(&self) -> Result<Arc<dyn SecurityHandler>> {
        Ok(Arc::new(IbmSecurityHandler::new(Arc::clone(&self.ctx))))
    }

    fn vpc_handler(&self) -> Result<Arc<dyn VpcHandler>> {
        Ok(Arc::new(IbmVpcHandler::new(Arc::clone(&self.ctx))))
    }

    fn image_handler(&self) -> Result<Arc<dyn ImageHandler>> {
        Ok(Arc::new(IbmImageHandler::new(Arc::clone(&self.ctx))))
    }

    fn file_system_handler(&self) -> Result<Arc<dyn FileSystemHandler>> {
        Ok(Arc::new(IbmFileSystemHandler::new(Arc::clone(&self.ctx))))
    }

    fn vm_spec_handler(&self) -> Result<Arc<dyn VmSpecHandler>> {
        Ok(Arc::new(IbmVmSpecHandler::new(Arc::clone(&self.ctx))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSoftLayer;
    use cloudplug_core::CloudError;

    #[test]
    fn test_driver_handlers() {
        let driver = IbmDriver::connect(Arc::new(FakeSoftLayer::seeded()), Scope::region("dal10")).unwrap();
        assert_eq!(driver.name(), "ibm");
        assert_eq!(driver.context().datacenter(), "dal10");

        let caps = driver.capabilities();
        assert!(caps.vm && caps.key_pair && caps.security && caps.vpc && caps.image);
        assert!(caps.file_system && caps.vm_spec);
        assert!(!caps.disk && !caps.tag && !caps.nlb);
        assert!(driver.vm_handler().is_ok());
        assert!(driver.file_system_handler().is_ok());
        assert!(driver.vm_spec_handler().is_ok());
        assert!(matches!(driver.disk_handler(), Err(CloudError::NotSupported { .. })));
        assert!(matches!(driver.nlb_handler(), Err(CloudError::NotSupported { .. })));
        assert!(matches!(driver.tag_handler(), Err(CloudError::NotSupported { .. })));
    }
}
