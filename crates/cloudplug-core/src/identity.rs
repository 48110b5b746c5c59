//! Resource identifiers and lookup scope
//!
//! A caller names a resource with a [`ResourceRef`]: a display name, a
//! provider-assigned system id, or both. The resolver turns it into an
//! [`Iid`], where both halves are known.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource type, used in error context and call logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vm,
    Vpc,
    Subnet,
    SecurityGroup,
    KeyPair,
    Disk,
    Nlb,
    Image,
    VmSpec,
    FileSystem,
    Tag,
    PublicIp,
    PortForwardingRule,
    FirewallRule,
    AsyncJob,
    Order,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "vm",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "security group",
            ResourceKind::KeyPair => "key pair",
            ResourceKind::Disk => "disk",
            ResourceKind::Nlb => "nlb",
            ResourceKind::Image => "image",
            ResourceKind::VmSpec => "vm spec",
            ResourceKind::FileSystem => "file system",
            ResourceKind::Tag => "tag",
            ResourceKind::PublicIp => "public ip",
            ResourceKind::PortForwardingRule => "port forwarding rule",
            ResourceKind::FirewallRule => "firewall rule",
            ResourceKind::AsyncJob => "async job",
            ResourceKind::Order => "order",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied identifier. At least one half must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
}

impl ResourceRef {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            system_id: None,
        }
    }

    pub fn by_id(system_id: impl Into<String>) -> Self {
        Self {
            name: None,
            system_id: Some(system_id.into()),
        }
    }

    pub fn new(name: impl Into<String>, system_id: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            system_id: Some(system_id.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|s| !s.is_empty())
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.name().is_none() && self.system_id().is_none()
    }

    /// Both halves present. The gatherer trusts these without a round trip.
    pub fn is_complete(&self) -> bool {
        self.name().is_some() && self.system_id().is_some()
    }

    /// Converts a complete reference into an [`Iid`].
    pub fn to_iid(&self) -> Option<Iid> {
        match (self.name(), self.system_id()) {
            (Some(name), Some(id)) => Some(Iid::new(name, id)),
            _ => None,
        }
    }

    pub fn require(&self, kind: ResourceKind) -> Result<()> {
        if self.is_empty() {
            return Err(CloudError::validation(
                kind,
                "either a name or a system id is required",
            ));
        }
        Ok(())
    }

    /// Best label for logs and error messages.
    pub fn label(&self) -> &str {
        self.name().or(self.system_id()).unwrap_or("<unnamed>")
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name(), self.system_id()) {
            (Some(n), Some(id)) => write!(f, "{} ({})", n, id),
            (Some(n), None) => write!(f, "name={}", n),
            (None, Some(id)) => write!(f, "id={}", id),
            (None, None) => f.write_str("<empty>"),
        }
    }
}

impl From<Iid> for ResourceRef {
    fn from(iid: Iid) -> Self {
        Self::new(iid.name_id, iid.system_id)
    }
}

impl From<&Iid> for ResourceRef {
    fn from(iid: &Iid) -> Self {
        Self::new(iid.name_id.clone(), iid.system_id.clone())
    }
}

/// Fully resolved identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Iid {
    pub name_id: String,
    pub system_id: String,
}

impl Iid {
    pub fn new(name_id: impl Into<String>, system_id: impl Into<String>) -> Self {
        Self {
            name_id: name_id.into(),
            system_id: system_id.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name_id.is_empty() && self.system_id.is_empty()
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name_id, self.system_id)
    }
}

/// Region/zone a lookup is restricted to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

impl Scope {
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone: None,
        }
    }

    pub fn zone(region: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone: Some(zone.into()),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Same region with the zone filter dropped.
    pub fn region_wide(&self) -> Self {
        Self {
            region: self.region.clone(),
            zone: None,
        }
    }

    /// `region/zone` or just `region`; used in call logs.
    pub fn label(&self) -> String {
        match &self.zone {
            Some(zone) => format!("{}/{}", self.region, zone),
            None => self.region.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_strings_count_as_missing() {
        let r = ResourceRef {
            name: Some(String::new()),
            system_id: Some("123".into()),
        };
        assert_eq!(r.name(), None);
        assert!(!r.is_complete());
        assert!(r.to_iid().is_none());
        assert_eq!(r.label(), "123");
    }

    #[test]
    fn test_require_rejects_empty_reference() {
        let err = ResourceRef::default()
            .require(ResourceKind::Image)
            .unwrap_err();
        assert!(matches!(
            err,
            CloudError::Validation {
                kind: ResourceKind::Image,
                ..
            }
        ));
    }

    #[test]
    fn test_scope_label() {
        assert_eq!(Scope::zone("kr", "kr-0").label(), "kr/kr-0");
        assert_eq!(Scope::region("seo01").label(), "seo01");
        assert_eq!(Scope::zone("kr", "kr-0").region_wide().zone, None);
    }
}
