//! Connection state shared by every KT Cloud handler

use crate::api::KtCloudApi;
use crate::error::ApiResult;
use crate::polling::KtPollPresets;
use cloudplug_core::{
    CallContext, CallLogger, CancellationToken, CloudError, MemoryRegistry, Poller,
    ProviderContext, ResourceKind, ResourceRegistry, Result, Scope, TracingCallLogger,
};
use std::future::Future;
use std::sync::Arc;

pub const CLOUD_NAME: &str = "KTCLOUD";

/// Login user created on new VMs by cloud-init
pub const DEFAULT_VM_USER: &str = "cb-user";

/// One KT Cloud connection: SDK client, zone and the collaborators the
/// handlers share.
pub struct KtContext {
    pub api: Arc<dyn KtCloudApi>,
    pub scope: Scope,
    pub calls: CallContext,
    pub registry: Arc<dyn ResourceRegistry>,
    pub presets: KtPollPresets,
    pub cancel: Option<CancellationToken>,
    pub vm_user: String,
    zone_id: String,
}

impl KtContext {
    /// KT Cloud resources are zonal, so `scope` must carry a zone.
    pub fn new(api: Arc<dyn KtCloudApi>, scope: Scope) -> Result<Self> {
        let Some(zone_id) = scope.zone.clone().filter(|z| !z.is_empty()) else {
            return Err(CloudError::validation(
                ResourceKind::Vm,
                "KT Cloud connection requires a zone",
            ));
        };
        Ok(Self {
            api,
            calls: CallContext::new(CLOUD_NAME, scope.label(), Arc::new(TracingCallLogger)),
            scope,
            registry: Arc::new(MemoryRegistry::new()),
            presets: KtPollPresets::default(),
            cancel: None,
            vm_user: DEFAULT_VM_USER.to_string(),
            zone_id,
        })
    }

    pub fn with_registry(mut self, registry: Arc<dyn ResourceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_call_logger(mut self, logger: Arc<dyn CallLogger>) -> Self {
        self.calls = CallContext::new(CLOUD_NAME, self.scope.label(), logger);
        self
    }

    pub fn with_presets(mut self, presets: KtPollPresets) -> Self {
        self.presets = presets;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_vm_user(mut self, user: impl Into<String>) -> Self {
        self.vm_user = user.into();
        self
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    /// Registry namespace for locally tracked resources of one kind.
    pub fn namespace(&self, kind: &str) -> String {
        format!("ktcloud/{}/{}", self.zone_id, kind)
    }

    pub fn poller(&self) -> Poller {
        match &self.cancel {
            Some(token) => Poller::with_cancellation(token.clone()),
            None => Poller::new(),
        }
    }

    /// Poller for teardown waits. A delete that was issued is always
    /// waited on, even after the connection's token has been cancelled.
    pub fn cleanup_poller(&self) -> Poller {
        Poller::new()
    }

    /// Runs one SDK call, turning its error into `CloudError::Provider`.
    pub async fn call<T, F>(&self, kind: ResourceKind, target: &str, api: &str, request: F) -> Result<T>
    where
        F: Future<Output = ApiResult<T>>,
    {
        tracing::debug!(api, target, zone = %self.zone_id, "Calling KT Cloud API");
        request.await.context(kind, target, api)
    }
}

impl std::fmt::Debug for KtContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KtContext")
            .field("scope", &self.scope)
            .field("presets", &self.presets)
            .field("vm_user", &self.vm_user)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeKtCloud;

    #[test]
    fn test_zone_is_required() {
        let err = KtContext::new(Arc::new(FakeKtCloud::new()), Scope::region("KR")).unwrap_err();
        assert!(matches!(err, CloudError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_poller_ignores_cancellation() {
        use cloudplug_core::{PollConfig, PollableOperation};
        use std::time::Duration;

        let token = CancellationToken::new();
        token.cancel();
        let ctx = KtContext::new(Arc::new(FakeKtCloud::new()), Scope::zone("KR", "kr-0"))
            .unwrap()
            .with_cancellation(token);
        let op = PollableOperation::new(ResourceKind::Vm, "vm-1", PollConfig::new(3, Duration::ZERO))
            .succeeds_on(&["destroyed"]);

        let err = ctx
            .poller()
            .wait_for_status(&op, || async { Ok("destroyed".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Cancelled(_)));

        let status = ctx
            .cleanup_poller()
            .wait_for_status(&op, || async { Ok("destroyed".to_string()) })
            .await
            .unwrap();
        assert_eq!(status, "destroyed");
    }

    #[test]
    fn test_namespace() {
        let ctx = KtContext::new(Arc::new(FakeKtCloud::new()), Scope::zone("KR", "kr-0")).unwrap();
        assert_eq!(ctx.namespace("security-group"), "ktcloud/kr-0/security-group");
    }
}
