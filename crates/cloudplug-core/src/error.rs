//! Error types for cloudplug drivers

use crate::identity::{Iid, ResourceKind};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    /// Malformed or incomplete request. Raised before any provider call.
    #[error("invalid {kind} request: {message}")]
    Validation { kind: ResourceKind, message: String },

    #[error("{kind} not found: {reference}")]
    NotFound {
        kind: ResourceKind,
        reference: String,
    },

    #[error("{kind} reference '{reference}' is ambiguous: {}", describe_candidates(.candidates))]
    Ambiguous {
        kind: ResourceKind,
        reference: String,
        candidates: Vec<Iid>,
    },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// A vendor SDK call failed.
    #[error("{operation} failed for {kind} '{target}': {message}")]
    Provider {
        kind: ResourceKind,
        target: String,
        operation: String,
        message: String,
    },

    /// The poller ran out of attempts. Distinct from a provider-reported failure.
    #[error("timed out waiting for {kind} '{target}' after {attempts} attempts ({waited:?}){}", last_seen(.last_status))]
    Timeout {
        kind: ResourceKind,
        target: String,
        attempts: u32,
        waited: Duration,
        last_status: Option<String>,
    },

    /// The provider reported a terminal failure state.
    #[error("{kind} '{target}' reached failure state '{status}'")]
    OperationFailed {
        kind: ResourceKind,
        target: String,
        status: String,
    },

    #[error("{operation} is not supported for {kind}")]
    NotSupported {
        kind: ResourceKind,
        operation: String,
    },

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("{saga} failed at step '{step}': {source}{}", rollback_note(.rolled_back, .warnings))]
    SagaFailed {
        saga: String,
        step: String,
        #[source]
        source: Box<CloudError>,
        rolled_back: Vec<String>,
        warnings: Vec<RollbackWarning>,
    },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// A compensating action that failed while a saga was unwinding.
///
/// Never replaces the primary error; it rides along on [`CloudError::SagaFailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackWarning {
    pub step: String,
    pub message: String,
}

impl fmt::Display for RollbackWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rollback of '{}' failed: {}", self.step, self.message)
    }
}

impl CloudError {
    pub fn validation(kind: ResourceKind, message: impl Into<String>) -> Self {
        CloudError::Validation {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(kind: ResourceKind, reference: impl Into<String>) -> Self {
        CloudError::NotFound {
            kind,
            reference: reference.into(),
        }
    }

    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        CloudError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn not_supported(kind: ResourceKind, operation: impl Into<String>) -> Self {
        CloudError::NotSupported {
            kind,
            operation: operation.into(),
        }
    }

    pub fn provider(
        kind: ResourceKind,
        target: impl Into<String>,
        operation: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        CloudError::Provider {
            kind,
            target: target.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, CloudError::Provider { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Timeout { .. })
    }

    /// The error at the bottom of a saga failure, or `self` otherwise.
    pub fn root_cause(&self) -> &CloudError {
        match self {
            CloudError::SagaFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Rollback warnings carried by a saga failure.
    pub fn rollback_warnings(&self) -> &[RollbackWarning] {
        match self {
            CloudError::SagaFailed { warnings, .. } => warnings,
            _ => &[],
        }
    }
}

/// Attaches step and resource context to a vendor SDK result.
pub trait ProviderContext<T> {
    fn context(
        self,
        kind: ResourceKind,
        target: impl Into<String>,
        operation: &str,
    ) -> Result<T>;
}

impl<T, E: fmt::Display> ProviderContext<T> for std::result::Result<T, E> {
    fn context(
        self,
        kind: ResourceKind,
        target: impl Into<String>,
        operation: &str,
    ) -> Result<T> {
        self.map_err(|e| CloudError::provider(kind, target, operation, e))
    }
}

fn describe_candidates(candidates: &[Iid]) -> String {
    let ids: Vec<&str> = candidates.iter().map(|c| c.system_id.as_str()).collect();
    format!("{} candidates ({})", ids.len(), ids.join(", "))
}

fn last_seen(status: &Option<String>) -> String {
    match status {
        Some(s) => format!(", last seen: {}", s),
        None => String::new(),
    }
}

fn rollback_note(rolled_back: &[String], warnings: &[RollbackWarning]) -> String {
    let mut note = String::new();
    if !rolled_back.is_empty() {
        note.push_str(&format!(" (rolled back: {})", rolled_back.join(", ")));
    }
    for warning in warnings {
        note.push_str(&format!("; {}", warning));
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saga_failure_message_names_step_and_warnings() {
        let err = CloudError::SagaFailed {
            saga: "start-vm".into(),
            step: "create-firewall-rule".into(),
            source: Box::new(CloudError::provider(
                ResourceKind::FirewallRule,
                "web-1",
                "createFirewallRule",
                "quota exceeded",
            )),
            rolled_back: vec!["associate-public-ip".into(), "deploy-vm".into()],
            warnings: vec![RollbackWarning {
                step: "associate-public-ip".into(),
                message: "ip busy".into(),
            }],
        };

        let msg = err.to_string();
        assert!(msg.contains("create-firewall-rule"));
        assert!(msg.contains("quota exceeded"));
        assert!(msg.contains("rolled back: associate-public-ip, deploy-vm"));
        assert!(msg.contains("ip busy"));
        assert!(matches!(err.root_cause(), CloudError::Provider { .. }));
        assert_eq!(err.rollback_warnings().len(), 1);
    }

    #[test]
    fn test_provider_context() {
        let res: std::result::Result<(), &str> = Err("connection reset");
        let err = res
            .context(ResourceKind::Vm, "vm-01", "deployVirtualMachine")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "deployVirtualMachine failed for vm 'vm-01': connection reset"
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = CloudError::Timeout {
            kind: ResourceKind::Disk,
            target: "vol-1".into(),
            attempts: 500,
            waited: Duration::from_secs(998),
            last_status: Some("pending".into()),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("last seen: pending"));
    }
}
