//! Dependency gathering for VM creation
//!
//! Resolves every reference a [`VmRequest`] carries before the provisioning
//! saga starts, so no step has to look an id up mid-flight. A reference
//! carrying both name and system id is trusted as given.

use crate::error::{CloudError, Result};
use crate::identity::{Iid, ResourceKind, ResourceRef, Scope};
use crate::model::{ImageType, VmRequest};
use async_trait::async_trait;

/// Driver-side resolution of each dependency kind.
///
/// Methods are only called with a reference that is missing one of its
/// fields; complete references never reach the source.
#[async_trait]
pub trait DependencySource: Send + Sync {
    async fn resolve_image(&self, scope: &Scope, image_type: ImageType, image: &ResourceRef) -> Result<Iid>;

    /// Checks a spec name and returns the form the create call takes.
    async fn resolve_spec(&self, scope: &Scope, spec_name: &str) -> Result<String>;

    async fn resolve_key_pair(&self, scope: &Scope, key_pair: &ResourceRef) -> Result<Iid>;

    async fn resolve_vpc(&self, scope: &Scope, vpc: &ResourceRef) -> Result<Iid>;

    /// Subnets are looked up within their parent VPC.
    async fn resolve_subnet(&self, scope: &Scope, vpc: &Iid, subnet: &ResourceRef) -> Result<Iid>;

    async fn resolve_security_group(&self, scope: &Scope, vpc: Option<&Iid>, group: &ResourceRef) -> Result<Iid>;
}

/// Which optional references a driver insists on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherPolicy {
    pub require_key_pair: bool,
    pub require_vpc: bool,
    pub require_subnet: bool,
}

impl Default for GatherPolicy {
    fn default() -> Self {
        Self {
            require_key_pair: true,
            require_vpc: true,
            require_subnet: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatheredDependencies {
    pub image: Iid,
    pub spec: String,
    pub key_pair: Option<Iid>,
    pub vpc: Option<Iid>,
    pub subnet: Option<Iid>,
    pub security_groups: Vec<Iid>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGatherer {
    policy: GatherPolicy,
}

impl DependencyGatherer {
    pub fn new(policy: GatherPolicy) -> Self {
        Self { policy }
    }

    /// Checks that every required reference is present. Runs before any
    /// provider call.
    pub fn validate(&self, request: &VmRequest) -> Result<()> {
        if request.name.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::Vm, "VM name is required"));
        }
        request.image.require(ResourceKind::Image)?;
        if request.spec_name.trim().is_empty() {
            return Err(CloudError::validation(ResourceKind::VmSpec, "VM spec name is required"));
        }
        if self.policy.require_key_pair {
            request.key_pair.require(ResourceKind::KeyPair)?;
        }
        if self.policy.require_vpc {
            request.vpc.require(ResourceKind::Vpc)?;
        }
        if self.policy.require_subnet {
            request.subnet.require(ResourceKind::Subnet)?;
        }
        if !request.subnet.is_empty() && request.vpc.is_empty() {
            return Err(CloudError::validation(
                ResourceKind::Subnet,
                "a subnet reference needs its VPC",
            ));
        }
        for group in &request.security_groups {
            group.require(ResourceKind::SecurityGroup)?;
        }
        Ok(())
    }

    /// Resolves every reference, stopping at the first one that fails.
    pub async fn gather<S: DependencySource + ?Sized>(
        &self,
        source: &S,
        scope: &Scope,
        request: &VmRequest,
    ) -> Result<GatheredDependencies> {
        self.validate(request)?;
        tracing::debug!(vm = %request.name, scope = %scope.label(), "gathering dependencies");

        let image = match request.image.to_iid() {
            Some(iid) => iid,
            None => source.resolve_image(scope, request.image_type, &request.image).await?,
        };

        let spec = source.resolve_spec(scope, request.spec_name.trim()).await?;

        let key_pair = match optional(&request.key_pair) {
            None => None,
            Some(Ok(iid)) => Some(iid),
            Some(Err(r)) => Some(source.resolve_key_pair(scope, r).await?),
        };

        let vpc = match optional(&request.vpc) {
            None => None,
            Some(Ok(iid)) => Some(iid),
            Some(Err(r)) => Some(source.resolve_vpc(scope, r).await?),
        };

        let subnet = match (optional(&request.subnet), &vpc) {
            (None, _) => None,
            (Some(Ok(iid)), _) => Some(iid),
            (Some(Err(r)), Some(parent)) => Some(source.resolve_subnet(scope, parent, r).await?),
            (Some(Err(_)), None) => {
                return Err(CloudError::validation(
                    ResourceKind::Subnet,
                    "a subnet reference needs its VPC",
                ));
            }
        };

        let mut security_groups = Vec::with_capacity(request.security_groups.len());
        for group in &request.security_groups {
            let iid = match group.to_iid() {
                Some(iid) => iid,
                None => source.resolve_security_group(scope, vpc.as_ref(), group).await?,
            };
            security_groups.push(iid);
        }

        Ok(GatheredDependencies {
            image,
            spec,
            key_pair,
            vpc,
            subnet,
            security_groups,
        })
    }
}

/// `None` for an empty reference, `Ok` for a complete one.
fn optional(reference: &ResourceRef) -> Option<std::result::Result<Iid, &ResourceRef>> {
    if reference.is_empty() {
        return None;
    }
    Some(reference.to_iid().ok_or(reference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSource {
        calls: Mutex<Vec<String>>,
        missing_groups: Vec<String>,
    }

    impl RecordingSource {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn label(r: &ResourceRef) -> String {
        r.name().or(r.system_id()).unwrap_or_default().to_string()
    }

    #[async_trait]
    impl DependencySource for RecordingSource {
        async fn resolve_image(&self, _: &Scope, _: ImageType, image: &ResourceRef) -> Result<Iid> {
            self.record(format!("image:{}", label(image)));
            Ok(Iid::new("ubuntu", "tmpl-1"))
        }

        async fn resolve_spec(&self, _: &Scope, spec_name: &str) -> Result<String> {
            self.record(format!("spec:{spec_name}"));
            Ok(spec_name.to_string())
        }

        async fn resolve_key_pair(&self, _: &Scope, key_pair: &ResourceRef) -> Result<Iid> {
            self.record(format!("keypair:{}", label(key_pair)));
            Ok(Iid::new(label(key_pair), "kp-1"))
        }

        async fn resolve_vpc(&self, _: &Scope, vpc: &ResourceRef) -> Result<Iid> {
            self.record(format!("vpc:{}", label(vpc)));
            Ok(Iid::new(label(vpc), "vpc-1"))
        }

        async fn resolve_subnet(&self, _: &Scope, vpc: &Iid, subnet: &ResourceRef) -> Result<Iid> {
            self.record(format!("subnet:{}@{}", label(subnet), vpc.system_id));
            Ok(Iid::new(label(subnet), "sn-1"))
        }

        async fn resolve_security_group(
            &self,
            _: &Scope,
            _: Option<&Iid>,
            group: &ResourceRef,
        ) -> Result<Iid> {
            let name = label(group);
            self.record(format!("sg:{name}"));
            if self.missing_groups.contains(&name) {
                return Err(CloudError::not_found(ResourceKind::SecurityGroup, name));
            }
            Ok(Iid::new(&name, format!("sg-{name}")))
        }
    }

    fn request() -> VmRequest {
        VmRequest {
            name: "web-1".into(),
            image: ResourceRef::by_name("ubuntu"),
            vpc: ResourceRef::by_name("vpc-a"),
            subnet: ResourceRef::by_name("sn-a"),
            security_groups: vec![ResourceRef::by_name("web"), ResourceRef::by_name("ssh")],
            spec_name: "svc-1".into(),
            key_pair: ResourceRef::by_name("kp"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_gather_resolves_in_order() {
        let source = RecordingSource::default();
        let gathered = DependencyGatherer::default()
            .gather(&source, &Scope::zone("kr", "kr-0"), &request())
            .await
            .unwrap();

        assert_eq!(
            source.calls(),
            vec!["image:ubuntu", "spec:svc-1", "keypair:kp", "vpc:vpc-a", "subnet:sn-a@vpc-1", "sg:web", "sg:ssh"]
        );
        assert_eq!(gathered.image.system_id, "tmpl-1");
        assert_eq!(gathered.subnet.unwrap().system_id, "sn-1");
        assert_eq!(gathered.security_groups.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_refs_are_trusted() {
        let source = RecordingSource::default();
        let mut req = request();
        req.image = ResourceRef::new("ubuntu", "stale-id");
        req.security_groups = vec![ResourceRef::new("web", "sg-web")];

        let gathered = DependencyGatherer::default()
            .gather(&source, &Scope::region("kr"), &req)
            .await
            .unwrap();

        assert_eq!(gathered.image.system_id, "stale-id");
        assert!(!source.calls().iter().any(|c| c.starts_with("image:") || c.starts_with("sg:")));
    }

    #[tokio::test]
    async fn test_security_groups_all_or_nothing() {
        let source = RecordingSource {
            missing_groups: vec!["web".into()],
            ..Default::default()
        };
        let err = DependencyGatherer::default()
            .gather(&source, &Scope::region("kr"), &request())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        // stopped at the first failure
        assert_eq!(source.calls().last().map(String::as_str), Some("sg:web"));
    }

    #[tokio::test]
    async fn test_missing_required_ref_fails_before_any_call() {
        let source = RecordingSource::default();
        let mut req = request();
        req.key_pair = ResourceRef::default();

        let err = DependencyGatherer::default()
            .gather(&source, &Scope::region("kr"), &req)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Validation { kind: ResourceKind::KeyPair, .. }));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_optional_refs_may_be_empty() {
        let source = RecordingSource::default();
        let mut req = request();
        req.vpc = ResourceRef::default();
        req.subnet = ResourceRef::default();

        let policy = GatherPolicy {
            require_vpc: false,
            require_subnet: false,
            ..Default::default()
        };
        let gathered = DependencyGatherer::new(policy)
            .gather(&source, &Scope::region("kr"), &req)
            .await
            .unwrap();
        assert!(gathered.vpc.is_none());
        assert!(gathered.subnet.is_none());
    }

    #[test]
    fn test_subnet_without_vpc_is_invalid() {
        let mut req = request();
        req.vpc = ResourceRef::default();
        let gatherer = DependencyGatherer::new(GatherPolicy {
            require_vpc: false,
            ..Default::default()
        });
        assert!(matches!(
            gatherer.validate(&req),
            Err(CloudError::Validation { kind: ResourceKind::Subnet, .. })
        ));
    }
}
