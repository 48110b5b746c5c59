//! SSH key pairs
//!
//! KT Cloud generates the key pair and returns only the private key. The
//! public half is derived locally and kept in the registry, since the API
//! never hands it out again.

use crate::api::SshKeyPair;
use crate::context::KtContext;
use async_trait::async_trait;
use cloudplug_core::model::{KeyPairInfo, KeyPairRequest, KeyValue};
use cloudplug_core::{
    CloudError, Iid, KeyPairHandler, ProviderContext, ResourceKind, ResourceRef, Result,
    TypedRegistry,
};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

pub const NAMESPACE: &str = "keypair";

/// Computes the OpenSSH public key for a PEM private key.
#[async_trait]
pub trait PublicKeyDeriver: Send + Sync {
    async fn public_key(&self, private_key: &str) -> Result<String>;
}

/// Runs `ssh-keygen -y`.
#[derive(Debug, Clone)]
pub struct SshKeygen {
    program: String,
}

impl SshKeygen {
    pub fn new() -> Self {
        Self {
            program: "ssh-keygen".to_string(),
        }
    }
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PublicKeyDeriver for SshKeygen {
    async fn public_key(&self, private_key: &str) -> Result<String> {
        // NamedTempFile is created with 0600, which ssh-keygen insists on
        let file = tempfile::NamedTempFile::new()?;
        tokio::fs::write(file.path(), private_key).await?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-y").arg("-f").arg(file.path());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} -y -f {}", self.program, file.path().display());

        let output = cmd
            .output()
            .await
            .context(ResourceKind::KeyPair, "private key", "ssh-keygen")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::provider(
                ResourceKind::KeyPair,
                "private key",
                "ssh-keygen",
                stderr.trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredPublicKey {
    public_key: String,
}

pub struct KtKeyPairHandler {
    ctx: Arc<KtContext>,
    deriver: Arc<dyn PublicKeyDeriver>,
}

impl KtKeyPairHandler {
    pub fn new(ctx: Arc<KtContext>, deriver: Arc<dyn PublicKeyDeriver>) -> Self {
        Self { ctx, deriver }
    }

    async fn stored_public_key(&self, name: &str) -> Result<String> {
        let namespace = self.ctx.namespace(NAMESPACE);
        Ok(TypedRegistry::new(self.ctx.registry.as_ref(), &namespace)
            .get::<StoredPublicKey>(name)
            .await?
            .map(|k| k.public_key)
            .unwrap_or_default())
    }

    async fn map_key(&self, key: &SshKeyPair) -> Result<KeyPairInfo> {
        let name = key.name.clone().unwrap_or_default();
        Ok(KeyPairInfo {
            iid: Iid::new(&name, &name),
            fingerprint: key.fingerprint.clone().unwrap_or_default(),
            public_key: self.stored_public_key(&name).await?,
            private_key: String::new(),
            vm_user_id: self.ctx.vm_user.clone(),
            key_values: vec![KeyValue::new("KeyPairName", &name)],
        })
    }

    async fn find(&self, key: &ResourceRef) -> Result<SshKeyPair> {
        key.require(ResourceKind::KeyPair)?;
        let name = key.system_id().or(key.name()).unwrap_or_default();
        self.ctx
            .call(ResourceKind::KeyPair, name, "listSSHKeyPairs", self.ctx.api.list_ssh_key_pairs(Some(name)))
            .await?
            .into_iter()
            .find(|k| k.name.as_deref() == Some(name))
            .ok_or_else(|| CloudError::not_found(ResourceKind::KeyPair, name))
    }

    async fn create(&self, request: KeyPairRequest) -> Result<KeyPairInfo> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(CloudError::validation(ResourceKind::KeyPair, "name is required"));
        }
        let existing = self
            .ctx
            .call(ResourceKind::KeyPair, name, "listSSHKeyPairs", self.ctx.api.list_ssh_key_pairs(Some(name)))
            .await?;
        if existing.iter().any(|k| k.name.as_deref() == Some(name)) {
            return Err(CloudError::already_exists(ResourceKind::KeyPair, name));
        }

        let created = self
            .ctx
            .call(ResourceKind::KeyPair, name, "createSSHKeyPair", self.ctx.api.create_ssh_key_pair(name))
            .await?;
        let private_key = created.privatekey.clone().unwrap_or_default();
        let public_key = format!("{} {}", self.deriver.public_key(&private_key).await?, self.ctx.vm_user);

        let namespace = self.ctx.namespace(NAMESPACE);
        TypedRegistry::new(self.ctx.registry.as_ref(), &namespace)
            .put(name, &StoredPublicKey {
                public_key: public_key.clone(),
            })
            .await?;
        tracing::info!(name, "key pair created");

        let mut info = self.map_key(&created).await?;
        info.public_key = public_key;
        info.private_key = private_key;
        Ok(info)
    }

    async fn delete(&self, key: &ResourceRef) -> Result<bool> {
        let found = self.find(key).await?;
        let name = found.name.unwrap_or_default();
        let deleted = self
            .ctx
            .call(ResourceKind::KeyPair, &name, "deleteSSHKeyPair", self.ctx.api.delete_ssh_key_pair(&name))
            .await?;
        self.ctx.registry.delete(&self.ctx.namespace(NAMESPACE), &name).await?;
        Ok(deleted)
    }
}

#[async_trait]
impl KeyPairHandler for KtKeyPairHandler {
    async fn create_key(&self, request: KeyPairRequest) -> Result<KeyPairInfo> {
        let timer = self.ctx.calls.start(ResourceKind::KeyPair, &request.name, "CreateKey");
        timer.finish(self.create(request).await)
    }

    async fn list_key(&self) -> Result<Vec<KeyPairInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::KeyPair, "", "ListKey");
        let result = async {
            let keys = self
                .ctx
                .call(ResourceKind::KeyPair, "", "listSSHKeyPairs", self.ctx.api.list_ssh_key_pairs(None))
                .await?;
            let mut infos = Vec::with_capacity(keys.len());
            for key in &keys {
                infos.push(self.map_key(key).await?);
            }
            Ok(infos)
        }
        .await;
        timer.finish(result)
    }

    async fn get_key(&self, key: &ResourceRef) -> Result<KeyPairInfo> {
        let timer = self.ctx.calls.start(ResourceKind::KeyPair, key.label(), "GetKey");
        let result = async { self.map_key(&self.find(key).await?).await }.await;
        timer.finish(result)
    }

    async fn delete_key(&self, key: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::KeyPair, key.label(), "DeleteKey");
        timer.finish(self.delete(key).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeKtCloud;
    use cloudplug_core::Scope;

    struct StaticDeriver;

    #[async_trait]
    impl PublicKeyDeriver for StaticDeriver {
        async fn public_key(&self, _private_key: &str) -> Result<String> {
            Ok("ssh-rsa AAAAB3Nza".to_string())
        }
    }

    fn handler(fake: Arc<FakeKtCloud>) -> KtKeyPairHandler {
        let ctx = KtContext::new(fake, Scope::zone("KR", "kr-0")).unwrap();
        KtKeyPairHandler::new(Arc::new(ctx), Arc::new(StaticDeriver))
    }

    #[tokio::test]
    async fn test_create_returns_private_key_once() {
        let fake = Arc::new(FakeKtCloud::new());
        let h = handler(fake.clone());

        let created = h
            .create_key(KeyPairRequest {
                name: "key-a".into(),
            })
            .await
            .unwrap();
        assert!(created.private_key.contains("PRIVATE KEY"));
        assert_eq!(created.public_key, "ssh-rsa AAAAB3Nza cb-user");

        let fetched = h.get_key(&ResourceRef::by_name("key-a")).await.unwrap();
        assert_eq!(fetched.private_key, "");
        assert_eq!(fetched.public_key, created.public_key);
        assert_eq!(fetched.fingerprint, created.fingerprint);
    }

    #[tokio::test]
    async fn test_duplicate_key_makes_no_create_call() {
        let fake = Arc::new(FakeKtCloud::new().with_key_pair("key-a", "aa:bb"));
        let h = handler(fake.clone());

        let err = h
            .create_key(KeyPairRequest {
                name: "key-a".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::AlreadyExists { .. }));
        assert_eq!(fake.call_count("createSSHKeyPair"), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_key_and_public_half() {
        let fake = Arc::new(FakeKtCloud::new());
        let h = handler(fake.clone());
        h.create_key(KeyPairRequest {
            name: "key-a".into(),
        })
        .await
        .unwrap();

        assert!(h.delete_key(&ResourceRef::by_name("key-a")).await.unwrap());
        assert!(fake.key_pairs().is_empty());
        assert!(h.list_key().await.unwrap().is_empty());
        let err = h.get_key(&ResourceRef::by_name("key-a")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
