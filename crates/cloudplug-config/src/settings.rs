//! The cloudplug YAML document
//!
//! ```yaml
//! connections:
//!   kt-seoul:
//!     provider: ktcloud
//!     region: KR
//!     zone: kr-0
//!     poll:
//!       vm_boot: { attempts: 200, interval_secs: 3 }
//!   ibm-dallas:
//!     provider: ibm
//!     region: dal10
//!     registry_namespace: team-a
//! registry:
//!   path: /var/lib/cloudplug
//! logging:
//!   level: info
//!   file: /var/log/cloudplug.log
//! ```

use crate::error::{ConfigError, Result};
use cloudplug_core::{FileRegistry, MemoryRegistry, PollConfig, ResourceRegistry, Scope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const ENV_LOG: &str = "CLOUDPLUG_LOG";
pub const ENV_REGISTRY_PATH: &str = "CLOUDPLUG_REGISTRY_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ktcloud,
    Ibm,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ktcloud => "ktcloud",
            Provider::Ibm => "ibm",
        }
    }

    /// KT Cloud addresses a zone; SoftLayer only a datacenter.
    pub fn requires_zone(&self) -> bool {
        matches!(self, Provider::Ktcloud)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial poll settings. Missing fields keep the preset's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PollOverride {
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub interval_secs: Option<f64>,
}

impl PollOverride {
    pub fn apply(&self, base: PollConfig) -> PollConfig {
        PollConfig::new(
            self.attempts.unwrap_or(base.max_attempts),
            self.interval_secs
                .map(|s| Duration::from_secs_f64(s.max(0.0)))
                .unwrap_or(base.interval),
        )
    }
}

impl From<PollOverride> for PollConfig {
    fn from(value: PollOverride) -> Self {
        value.apply(PollConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub provider: Provider,
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
    /// Registry namespace segment; the driver default applies when unset
    #[serde(default)]
    pub registry_namespace: Option<String>,
    /// Poll overrides keyed by preset name (`vm_boot`, `provision`, ...)
    #[serde(default)]
    pub poll: BTreeMap<String, PollOverride>,
}

impl ConnectionConfig {
    pub fn scope(&self) -> Scope {
        match self.zone.as_deref().filter(|z| !z.is_empty()) {
            Some(zone) => Scope::zone(&self.region, zone),
            None => Scope::region(&self.region),
        }
    }

    /// `base` with the override named `preset` applied, if there is one.
    pub fn poll_config(&self, preset: &str, base: PollConfig) -> PollConfig {
        match self.poll.get(preset) {
            Some(o) => o.apply(base),
            None => base,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let invalid = |message: String| ConfigError::InvalidConnection {
            name: name.to_string(),
            message,
        };
        if self.region.trim().is_empty() {
            return Err(invalid("region is required".into()));
        }
        if self.provider.requires_zone() && self.zone.as_deref().is_none_or(|z| z.trim().is_empty()) {
            return Err(invalid(format!("{} connections need a zone", self.provider)));
        }
        for (preset, o) in &self.poll {
            if o.attempts == Some(0) {
                return Err(invalid(format!("poll preset '{}' needs at least one attempt", preset)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory of the file registry; in-memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl RegistryConfig {
    pub fn open(&self) -> Arc<dyn ResourceRegistry> {
        match &self.path {
            Some(dir) => {
                tracing::debug!(path = %dir.display(), "using file registry");
                Arc::new(FileRegistry::new(dir))
            }
            None => Arc::new(MemoryRegistry::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Log file; stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudplugConfig {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CloudplugConfig {
    /// Parses and validates a document. Environment overrides are not
    /// applied here.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: CloudplugConfig = serde_yaml::from_str(text)?;
        for (name, connection) in &config.connections {
            connection.validate(name)?;
        }
        Ok(config)
    }

    /// Reads `path` and applies the environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&text)?;
        config.apply_env_overrides();
        tracing::debug!(path = %path.display(), connections = config.connections.len(), "config loaded");
        Ok(config)
    }

    /// `CLOUDPLUG_LOG` replaces the log level and `CLOUDPLUG_REGISTRY_PATH`
    /// the registry directory.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(ENV_LOG)
            && !level.trim().is_empty()
        {
            self.logging.level = level;
        }
        if let Ok(path) = std::env::var(ENV_REGISTRY_PATH)
            && !path.trim().is_empty()
        {
            self.registry.path = Some(PathBuf::from(path));
        }
    }

    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections
            .get(name)
            .ok_or_else(|| ConfigError::UnknownConnection(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
connections:
  kt-seoul:
    provider: ktcloud
    region: KR
    zone: kr-0
    poll:
      vm_boot:
        attempts: 200
  ibm-dallas:
    provider: ibm
    region: dal10
    registry_namespace: team-a
    poll:
      provision:
        attempts: 60
        interval_secs: 2
registry:
  path: /var/lib/cloudplug
"#;

    #[test]
    fn test_parse_sample() {
        let config = CloudplugConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.connections.len(), 2);

        let kt = config.connection("kt-seoul").unwrap();
        assert_eq!(kt.provider, Provider::Ktcloud);
        assert_eq!(kt.scope(), Scope::zone("KR", "kr-0"));

        let ibm = config.connection("ibm-dallas").unwrap();
        assert_eq!(ibm.scope(), Scope::region("dal10"));
        assert_eq!(ibm.registry_namespace.as_deref(), Some("team-a"));

        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.registry.path, Some(PathBuf::from("/var/lib/cloudplug")));
    }

    #[test]
    fn test_poll_override_keeps_missing_fields() {
        let config = CloudplugConfig::from_yaml(SAMPLE).unwrap();
        let base = PollConfig::new(500, Duration::from_secs(3));

        let kt = config.connection("kt-seoul").unwrap();
        assert_eq!(kt.poll_config("vm_boot", base), PollConfig::new(200, Duration::from_secs(3)));
        assert_eq!(kt.poll_config("disk_create", base), base);

        let ibm = config.connection("ibm-dallas").unwrap();
        let provision: PollConfig = ibm.poll["provision"].into();
        assert_eq!(provision, PollConfig::new(60, Duration::from_secs(2)));
    }

    #[test]
    fn test_kt_connection_needs_zone() {
        let err = CloudplugConfig::from_yaml("connections:\n  kt:\n    provider: ktcloud\n    region: KR\n")
            .unwrap_err();
        match err {
            ConfigError::InvalidConnection { name, message } => {
                assert_eq!(name, "kt");
                assert!(message.contains("zone"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let text = "connections:\n  ibm:\n    provider: ibm\n    region: dal10\n    poll:\n      provision: { attempts: 0 }\n";
        assert!(matches!(
            CloudplugConfig::from_yaml(text),
            Err(ConfigError::InvalidConnection { .. })
        ));
    }

    #[test]
    fn test_unknown_provider_is_a_yaml_error() {
        let text = "connections:\n  x:\n    provider: aws\n    region: us-east-1\n";
        assert!(matches!(CloudplugConfig::from_yaml(text), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_unknown_connection() {
        let config = CloudplugConfig::default();
        assert!(matches!(
            config.connection("nope"),
            Err(ConfigError::UnknownConnection(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_vars(
            [(ENV_LOG, Some("debug")), (ENV_REGISTRY_PATH, Some("/tmp/cloudplug-registry"))],
            || {
                let mut config = CloudplugConfig::from_yaml(SAMPLE).unwrap();
                config.apply_env_overrides();
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.registry.path, Some(PathBuf::from("/tmp/cloudplug-registry")));
            },
        );
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        temp_env::with_vars([(ENV_LOG, Some("")), (ENV_REGISTRY_PATH, None::<&str>)], || {
            let mut config = CloudplugConfig::from_yaml(SAMPLE).unwrap();
            config.apply_env_overrides();
            assert_eq!(config.logging.level, "info");
            assert_eq!(config.registry.path, Some(PathBuf::from("/var/lib/cloudplug")));
        });
    }

    #[tokio::test]
    async fn test_registry_opens_file_registry() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            path: Some(dir.path().to_path_buf()),
        };

        let registry = config.open();
        registry
            .put("ibm/dal10/keypair", "key-a", serde_json::json!({"key_id": 801}))
            .await
            .unwrap();

        let reopened = config.open();
        let record = reopened.get("ibm/dal10/keypair", "key-a").await.unwrap().unwrap();
        assert_eq!(record.value["key_id"], 801);
    }
}
