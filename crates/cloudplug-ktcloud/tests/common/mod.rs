//! Shared fixtures for the KT Cloud integration tests

use cloudplug_core::model::{SecurityGroupRequest, SecurityRule, VmRequest};
use cloudplug_core::{CloudDriver, MemoryCallLogger, ResourceRef, Scope};
use cloudplug_ktcloud::{FakeKtCloud, KtCloudDriver, KtContext};
use std::sync::Arc;

pub struct Connection {
    pub fake: Arc<FakeKtCloud>,
    pub driver: KtCloudDriver,
    pub calls: MemoryCallLogger,
}

/// Driver over `fake` in zone kr-0, recording every handler call.
pub fn connect(fake: FakeKtCloud) -> Connection {
    connect_with(fake, |ctx| ctx)
}

pub fn connect_with(fake: FakeKtCloud, configure: impl FnOnce(KtContext) -> KtContext) -> Connection {
    let fake = Arc::new(fake.with_key_pair("key-a", "aa:bb"));
    let calls = MemoryCallLogger::new();
    let ctx = KtContext::new(fake.clone(), Scope::zone("KR", "kr-0"))
        .unwrap()
        .with_call_logger(Arc::new(calls.clone()));
    Connection {
        fake,
        driver: KtCloudDriver::new(configure(ctx)),
        calls,
    }
}

impl Connection {
    pub async fn security_group(&self, name: &str, rules: Vec<SecurityRule>) {
        self.driver
            .security_handler()
            .unwrap()
            .create_security(SecurityGroupRequest {
                name: name.into(),
                vpc: ResourceRef::by_name("vpc-a"),
                rules,
            })
            .await
            .unwrap();
    }
}

pub fn vm_request(name: &str, group: &str) -> VmRequest {
    VmRequest {
        name: name.into(),
        image: ResourceRef::by_name("Ubuntu 22.04 64bit"),
        spec_name: "svc-1c2g".into(),
        key_pair: ResourceRef::by_name("key-a"),
        security_groups: vec![ResourceRef::by_name(group)],
        ..Default::default()
    }
}
