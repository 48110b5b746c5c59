//! Connection state shared by every IBM handler

use crate::api::SoftLayerApi;
use crate::error::{ApiResult, SoftLayerError};
use cloudplug_core::{
    CallContext, CallLogger, CancellationToken, CloudError, MemoryRegistry, PollConfig, Poller,
    ProviderContext, ResourceKind, ResourceRegistry, Result, Scope, TracingCallLogger,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const CLOUD_NAME: &str = "IBM";

/// Login user created on new guests by cloud-init
pub const DEFAULT_VM_USER: &str = "cb-user";

/// 120 reads, one second apart
pub const VM_PROVISION: PollConfig = PollConfig::new(120, Duration::from_secs(1));

/// NAS volumes take minutes to settle: 120 reads, five seconds apart
pub const FILE_STORAGE_READY: PollConfig = PollConfig::new(120, Duration::from_secs(5));

/// One SoftLayer connection. The scope's region is the datacenter name
/// (`dal10`); SoftLayer has no zones below it.
pub struct IbmContext {
    pub api: Arc<dyn SoftLayerApi>,
    pub scope: Scope,
    pub calls: CallContext,
    pub registry: Arc<dyn ResourceRegistry>,
    pub provision: PollConfig,
    pub storage: PollConfig,
    pub cancel: Option<CancellationToken>,
    pub vm_user: String,
    namespace: String,
}

impl IbmContext {
    pub fn new(api: Arc<dyn SoftLayerApi>, scope: Scope) -> Result<Self> {
        if scope.region.trim().is_empty() {
            return Err(CloudError::validation(
                ResourceKind::Vm,
                "IBM connection requires a datacenter as its region",
            ));
        }
        Ok(Self {
            api,
            calls: CallContext::new(CLOUD_NAME, scope.label(), Arc::new(TracingCallLogger)),
            namespace: scope.region.clone(),
            scope,
            registry: Arc::new(MemoryRegistry::new()),
            provision: VM_PROVISION,
            storage: FILE_STORAGE_READY,
            cancel: None,
            vm_user: DEFAULT_VM_USER.to_string(),
        })
    }

    pub fn with_registry(mut self, registry: Arc<dyn ResourceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Registry namespace segment; defaults to the datacenter.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_call_logger(mut self, logger: Arc<dyn CallLogger>) -> Self {
        self.calls = CallContext::new(CLOUD_NAME, self.scope.label(), logger);
        self
    }

    pub fn with_provision_poll(mut self, config: PollConfig) -> Self {
        self.provision = config;
        self
    }

    pub fn with_storage_poll(mut self, config: PollConfig) -> Self {
        self.storage = config;
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

    pub fn datacenter(&self) -> &str {
        &self.scope.region
    }

    /// Registry namespace for locally kept data of one kind.
    pub fn namespace(&self, kind: &str) -> String {
        format!("ibm/{}/{}", self.namespace, kind)
    }

    pub fn poller(&self) -> Poller {
        match &self.cancel {
            Some(token) => Poller::with_cancellation(token.clone()),
            None => Poller::new(),
        }
    }

    /// Runs one SDK call, turning its error into `CloudError::Provider`.
    pub async fn call<T, F>(&self, kind: ResourceKind, target: &str, api: &str, request: F) -> Result<T>
    where
        F: Future<Output = ApiResult<T>>,
    {
        tracing::debug!(api, target, datacenter = %self.datacenter(), "Calling SoftLayer API");
        request.await.context(kind, target, api)
    }

    /// Like [`call`](Self::call), with a SoftLayer `NotFound` read as `None`.
    pub async fn call_optional<T, F>(&self, kind: ResourceKind, target: &str, api: &str, request: F) -> Result<Option<T>>
    where
        F: Future<Output = ApiResult<T>>,
    {
        tracing::debug!(api, target, datacenter = %self.datacenter(), "Calling SoftLayer API");
        match request.await {
            Ok(value) => Ok(Some(value)),
            Err(SoftLayerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e).context(kind, target, api),
        }
    }
}

impl std::fmt::Debug for IbmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IbmContext")
            .field("scope", &self.scope)
            .field("namespace", &self.namespace)
            .field("provision", &self.provision)
            .field("storage", &self.storage)
            .field("vm_user", &self.vm_user)
            .finish_non_exhaustive()
    }
}

/// Parses a SoftLayer numeric id.
pub fn parse_id(kind: ResourceKind, id: &str) -> Result<i64> {
    id.trim()
        .parse()
        .map_err(|_| CloudError::validation(kind, format!("'{}' is not a SoftLayer id", id)))
}
