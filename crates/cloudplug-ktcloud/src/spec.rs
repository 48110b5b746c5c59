//! VM spec strings
//!
//! KT Cloud has no single "instance type": a VM is a service offering plus
//! an optional data disk offering. Both travel in one spec name,
//! `<serviceOfferingId>!<diskOfferingId>_disk<N>GB`, or just
//! `<serviceOfferingId>` when the VM only gets its root disk.

use cloudplug_core::{CloudError, ResourceKind, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    pub service_offering_id: String,
    pub disk_offering_id: Option<String>,
    pub disk_size_gb: Option<u32>,
}

impl VmSpec {
    pub fn root_only(service_offering_id: impl Into<String>) -> Self {
        Self {
            service_offering_id: service_offering_id.into(),
            disk_offering_id: None,
            disk_size_gb: None,
        }
    }

    /// Disk size as reported on `VmInfo`, empty for root-only specs.
    pub fn disk_size_label(&self) -> String {
        self.disk_size_gb.map(|n| n.to_string()).unwrap_or_default()
    }
}

fn invalid(spec: &str, reason: &str) -> CloudError {
    CloudError::validation(ResourceKind::VmSpec, format!("'{}': {}", spec, reason))
}

impl FromStr for VmSpec {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid(s, "spec name is empty"));
        }

        let Some((service, disk)) = s.split_once('!') else {
            return Ok(Self::root_only(s));
        };
        if service.is_empty() {
            return Err(invalid(s, "missing service offering id"));
        }

        let (offering, size) = disk
            .split_once("_disk")
            .ok_or_else(|| invalid(s, "expected <diskOfferingId>_disk<N>GB after '!'"))?;
        if offering.is_empty() {
            return Err(invalid(s, "missing disk offering id"));
        }
        let size = size
            .strip_suffix("GB")
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| invalid(s, "disk size must look like <N>GB"))?;

        Ok(Self {
            service_offering_id: service.to_string(),
            disk_offering_id: Some(offering.to_string()),
            disk_size_gb: Some(size),
        })
    }
}

impl fmt::Display for VmSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.disk_offering_id, self.disk_size_gb) {
            (Some(offering), Some(size)) => {
                write!(f, "{}!{}_disk{}GB", self.service_offering_id, offering, size)
            }
            _ => f.write_str(&self.service_offering_id),
        }
    }
}
