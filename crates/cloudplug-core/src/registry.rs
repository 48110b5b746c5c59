//! Local resource registry
//!
//! Some provider state has no API behind it: KT Cloud has no security-group
//! or VPC objects, and neither provider keeps private keys. Drivers keep that
//! state in a [`ResourceRegistry`], a namespaced key/value store.
//! [`FileRegistry`] persists it to a JSON document, and [`MemoryRegistry`]
//! keeps it in process.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

const REGISTRY_VERSION: u32 = 1;
const REGISTRY_FILE: &str = "registry.json";
const REGISTRY_BACKUP: &str = "registry.json.backup";

/// One stored entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistryRecord {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<RegistryRecord>>;

    /// Inserts or replaces. `created_at` survives a replace.
    async fn put(&self, namespace: &str, key: &str, value: serde_json::Value) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Entries in `namespace`, ordered by key.
    async fn list(&self, namespace: &str) -> Result<Vec<RegistryRecord>>;
}

/// Typed helpers over any registry.
pub struct TypedRegistry<'a> {
    inner: &'a dyn ResourceRegistry,
    namespace: &'a str,
}

impl<'a> TypedRegistry<'a> {
    pub fn new(inner: &'a dyn ResourceRegistry, namespace: &'a str) -> Self {
        Self { inner, namespace }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get(self.namespace, key).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.inner.put(self.namespace, key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(self.namespace, key).await
    }

    pub async fn list<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.inner
            .list(self.namespace)
            .await?
            .iter()
            .map(|r| r.decode())
            .collect()
    }
}

type Namespaces = BTreeMap<String, BTreeMap<String, RegistryRecord>>;

fn upsert(namespaces: &mut Namespaces, namespace: &str, key: &str, value: serde_json::Value) {
    let entries = namespaces.entry(namespace.to_string()).or_default();
    match entries.get_mut(key) {
        Some(existing) => {
            existing.value = value;
            existing.updated_at = Utc::now();
        }
        None => {
            entries.insert(key.to_string(), RegistryRecord::new(key, value));
        }
    }
}

fn remove(namespaces: &mut Namespaces, namespace: &str, key: &str) -> bool {
    let Some(entries) = namespaces.get_mut(namespace) else {
        return false;
    };
    let removed = entries.remove(key).is_some();
    if entries.is_empty() {
        namespaces.remove(namespace);
    }
    removed
}

/// In-process registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    namespaces: RwLock<Namespaces>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceRegistry for MemoryRegistry {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<RegistryRecord>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces.get(namespace).and_then(|e| e.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        upsert(&mut namespaces, namespace, key, value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().await;
        Ok(remove(&mut namespaces, namespace, key))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<RegistryRecord>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// On-disk document layout
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    updated_at: DateTime<Utc>,
    namespaces: Namespaces,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            updated_at: Utc::now(),
            namespaces: Namespaces::new(),
        }
    }
}

/// Registry persisted as `registry.json` in a directory.
///
/// Every mutation rewrites the document and keeps the previous one as
/// `registry.json.backup`. Access within one process is serialized by an
/// async mutex; separate processes sharing the directory are not coordinated.
#[derive(Debug)]
pub struct FileRegistry {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_BACKUP)
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
            tracing::debug!("Created registry directory: {}", self.dir.display());
        }
        Ok(())
    }

    async fn load(&self) -> Result<RegistryDocument> {
        let path = self.path();
        if !path.exists() {
            return Ok(RegistryDocument::default());
        }

        let content = fs::read_to_string(&path).await?;
        let doc: RegistryDocument = serde_json::from_str(&content)?;

        if doc.version > REGISTRY_VERSION {
            return Err(CloudError::Registry(format!(
                "registry file version {} is newer than supported version {}",
                doc.version, REGISTRY_VERSION
            )));
        }
        Ok(doc)
    }

    async fn save(&self, doc: &mut RegistryDocument) -> Result<()> {
        self.ensure_dir().await?;
        doc.updated_at = Utc::now();

        let path = self.path();
        let backup = self.backup_path();
        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(doc)?;
        fs::write(&path, content).await?;
        tracing::debug!(
            namespaces = doc.namespaces.len(),
            "Saved registry to {}",
            path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl ResourceRegistry for FileRegistry {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<RegistryRecord>> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(doc.namespaces.get(namespace).and_then(|e| e.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        upsert(&mut doc.namespaces, namespace, key, value);
        self.save(&mut doc).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let removed = remove(&mut doc.namespaces, namespace, key);
        if removed {
            self.save(&mut doc).await?;
        }
        Ok(removed)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<RegistryRecord>> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(doc
            .namespaces
            .get(namespace)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default())
    }
}
