//! SSH keys
//!
//! SoftLayer only stores public keys. The pair is generated locally, the
//! public half is registered with SoftLayer and the private half is kept in
//! the resource registry under the key's label.

use crate::context::IbmContext;
use crate::lookup::SshKeyLookup;
use crate::mapper;
use async_trait::async_trait;
use cloudplug_core::model::{KeyPairInfo, KeyPairRequest};
use cloudplug_core::{
    CloudError, Compensation, KeyPairHandler, Lookup, ProviderContext, ResourceKind, ResourceRef,
    Resolver, Result, Saga, TypedRegistry, ensure_absent,
};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

pub const NAMESPACE: &str = "keypair";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    /// PEM encoded
    pub private_key: String,
    /// OpenSSH `ssh-rsa ...` line
    pub public_key: String,
}

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate(&self, comment: &str) -> Result<GeneratedKey>;
}

/// Runs `ssh-keygen -t rsa -b 4096` in a scratch directory.
#[derive(Debug, Clone)]
pub struct SshKeygenGenerator {
    program: String,
    bits: u32,
}

impl SshKeygenGenerator {
    pub fn new() -> Self {
        Self {
            program: "ssh-keygen".to_string(),
            bits: 4096,
        }
    }
}

impl Default for SshKeygenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyGenerator for SshKeygenGenerator {
    async fn generate(&self, comment: &str) -> Result<GeneratedKey> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("key");

        let mut cmd = Command::new(&self.program);
        cmd.args(["-t", "rsa", "-b", &self.bits.to_string(), "-m", "PEM", "-N", "", "-q", "-C", comment])
            .arg("-f")
            .arg(&path);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} -t rsa -b {} -f {}", self.program, self.bits, path.display());

        let output = cmd
            .output()
            .await
            .context(ResourceKind::KeyPair, comment, "ssh-keygen")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::provider(ResourceKind::KeyPair, comment, "ssh-keygen", stderr.trim()));
        }

        let private_key = tokio::fs::read_to_string(&path).await?;
        let public_key = tokio::fs::read_to_string(path.with_extension("pub")).await?;
        Ok(GeneratedKey {
            private_key,
            public_key: public_key.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredPrivateKey {
    key_id: i64,
    private_key: String,
}

fn delete_key(ctx: Arc<IbmContext>, key_id: i64) -> Compensation {
    async move {
        ctx.call(
            ResourceKind::KeyPair,
            &key_id.to_string(),
            "deleteSshKey",
            ctx.api.delete_ssh_key(key_id),
        )
        .await?;
        Ok(())
    }
    .boxed()
}

pub struct IbmKeyPairHandler {
    ctx: Arc<IbmContext>,
    generator: Arc<dyn KeyGenerator>,
}

impl IbmKeyPairHandler {
    pub fn new(ctx: Arc<IbmContext>, generator: Arc<dyn KeyGenerator>) -> Self {
        Self { ctx, generator }
    }

    async fn create(&self, request: KeyPairRequest) -> Result<KeyPairInfo> {
        let ctx = &self.ctx;
        let name = request.name.trim();
        if name.is_empty() {
            return Err(CloudError::validation(ResourceKind::KeyPair, "name is required"));
        }
        ensure_absent(&SshKeyLookup(ctx), &ctx.scope, name).await?;

        let generated = self.generator.generate(name).await?;
        let namespace = ctx.namespace(NAMESPACE);

        let mut saga = Saga::new("create-key").with_cancellation(ctx.cancel.clone());
        let key = saga
            .execute_with_undo(
                "register-key",
                ctx.call(
                    ResourceKind::KeyPair,
                    name,
                    "createSshKey",
                    ctx.api.create_ssh_key(name, &generated.public_key),
                ),
                |key: &crate::api::SshKey| match key.id {
                    Some(id) => delete_key(Arc::clone(&self.ctx), id),
                    None => async { Ok::<_, CloudError>(()) }.boxed(),
                },
            )
            .await?;

        let stored = StoredPrivateKey {
            key_id: key.id.unwrap_or_default(),
            private_key: generated.private_key.clone(),
        };
        saga.execute(
            "store-private-key",
            TypedRegistry::new(ctx.registry.as_ref(), &namespace).put(name, &stored),
        )
        .await?;
        saga.commit();
        tracing::info!(name, key_id = stored.key_id, "key pair created");

        let mut info = mapper::map_key_pair(&key, &ctx.vm_user);
        info.private_key = generated.private_key;
        Ok(info)
    }

    async fn delete(&self, key: &ResourceRef) -> Result<bool> {
        let ctx = &self.ctx;
        let resolved = Resolver::new()
            .resolve(&SshKeyLookup(ctx), &ctx.scope, key)
            .await?;
        let key_id = resolved.resource.id.unwrap_or_default();
        ctx.call(
            ResourceKind::KeyPair,
            &key_id.to_string(),
            "deleteSshKey",
            ctx.api.delete_ssh_key(key_id),
        )
        .await?;

        let namespace = ctx.namespace(NAMESPACE);
        if !TypedRegistry::new(ctx.registry.as_ref(), &namespace)
            .delete(&resolved.iid.name_id)
            .await?
        {
            tracing::debug!(name = %resolved.iid.name_id, "no private key stored for key");
        }
        Ok(true)
    }
}

#[async_trait]
impl KeyPairHandler for IbmKeyPairHandler {
    async fn create_key(&self, request: KeyPairRequest) -> Result<KeyPairInfo> {
        let timer = self.ctx.calls.start(ResourceKind::KeyPair, &request.name, "CreateKey");
        timer.finish(self.create(request).await)
    }

    async fn list_key(&self) -> Result<Vec<KeyPairInfo>> {
        let timer = self.ctx.calls.start(ResourceKind::KeyPair, "", "ListKey");
        let keys = SshKeyLookup(&self.ctx).list(&self.ctx.scope).await.map(|keys| {
            keys.iter()
                .map(|k| mapper::map_key_pair(k, &self.ctx.vm_user))
                .collect()
        });
        timer.finish(keys)
    }

    async fn get_key(&self, key: &ResourceRef) -> Result<KeyPairInfo> {
        let timer = self.ctx.calls.start(ResourceKind::KeyPair, key.label(), "GetKey");
        let info = Resolver::new()
            .resolve(&SshKeyLookup(&self.ctx), &self.ctx.scope, key)
            .await
            .map(|r| mapper::map_key_pair(&r.resource, &self.ctx.vm_user));
        timer.finish(info)
    }

    async fn delete_key(&self, key: &ResourceRef) -> Result<bool> {
        let timer = self.ctx.calls.start(ResourceKind::KeyPair, key.label(), "DeleteKey");
        timer.finish(self.delete(key).await)
    }
}
