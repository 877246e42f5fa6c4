//! Re-encryption of tracked secrets to the current set of public keys,
//! used after adding or removing a recipient. Plaintext never touches
//! the disk.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info};

use super::batch::{resolve_ids, run_batch};
use crate::cancel::CancellationToken;
use crate::encrypt::Encrypter;
use crate::error::{BoxError, SecretFailure, Stage};
use crate::model::{PrivateKeyList, PublicKeyList, Secret, SecretRegistry};
use crate::process::IdProcessor;
use crate::storage::{KeyRepository, SecretRepository, TrackRepository};

#[derive(Debug, Clone, Default)]
pub struct ReencryptBoxRequest {
    /// Raw ids; empty means every tracked secret
    pub secret_ids: Vec<String>,
}

pub struct ServiceConfig {
    pub key_repo: Arc<dyn KeyRepository>,
    pub secret_repo: Arc<dyn SecretRepository>,
    pub track_repo: Arc<dyn TrackRepository>,
    pub encrypter: Arc<dyn Encrypter>,
    pub id_processor: Arc<dyn IdProcessor>,
    pub workers: usize,
}

pub struct Service {
    key_repo: Arc<dyn KeyRepository>,
    secret_repo: Arc<dyn SecretRepository>,
    track_repo: Arc<dyn TrackRepository>,
    encrypter: Arc<dyn Encrypter>,
    id_processor: Arc<dyn IdProcessor>,
    workers: usize,
}

struct Keys {
    private: PrivateKeyList,
    public: PublicKeyList,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            key_repo: config.key_repo,
            secret_repo: config.secret_repo,
            track_repo: config.track_repo,
            encrypter: config.encrypter,
            id_processor: config.id_processor,
            workers: config.workers.max(1),
        }
    }

    pub fn reencrypt_box(&self, ctx: &CancellationToken, req: ReencryptBoxRequest) -> Result<Vec<String>, BoxError> {
        let registry = self
            .track_repo
            .get_secret_registry(ctx)
            .map_err(|e| BoxError::precondition("secret registry", e))?;

        let raw_ids = if req.secret_ids.is_empty() {
            registry.ids()
        } else {
            req.secret_ids
        };

        let resolved = resolve_ids(ctx, self.id_processor.as_ref(), &raw_ids)?;
        if resolved.ids.is_empty() {
            return Err(BoxError::NoSecrets);
        }

        let keys = Keys {
            private: self
                .key_repo
                .list_private_keys(ctx)
                .map_err(|e| BoxError::precondition("private keys", e))?,
            public: self
                .key_repo
                .list_public_keys(ctx)
                .map_err(|e| BoxError::precondition("public keys", e))?,
        };

        info!(in_scope = resolved.ids.len(), recipients = keys.public.len(), "re-encrypting box");

        let outcome = run_batch(ctx, &resolved.ids, self.workers, |id| {
            self.reencrypt_secret(ctx, id, &registry, &keys)
        });
        let done = outcome.conclude(resolved.failures)?;

        info!(reencrypted = done.len(), "box re-encrypted");
        Ok(done.into_iter().map(|(id, _)| id).collect())
    }

    fn reencrypt_secret(
        &self,
        ctx: &CancellationToken,
        id: &str,
        registry: &SecretRegistry,
        keys: &Keys,
    ) -> Result<(), SecretFailure> {
        if !registry.is_tracked(id) {
            return Err(SecretFailure::new(id, Stage::Track, anyhow!("secret is not tracked")));
        }

        let secret = self
            .secret_repo
            .get_encrypted_secret(ctx, id)
            .map_err(|e| SecretFailure::new(id, Stage::Fetch, e))?;
        let opened = self
            .encrypter
            .decrypt(ctx, secret, &keys.private)
            .map_err(|e| SecretFailure::new(id, Stage::Decrypt, e))?;

        let plain = Secret {
            id: opened.id,
            encrypted_data: None,
            decrypted_data: opened.decrypted_data,
        };
        let sealed = self
            .encrypter
            .encrypt(ctx, plain, &keys.public)
            .map_err(|e| SecretFailure::new(id, Stage::Encrypt, e))?;
        self.secret_repo
            .save_encrypted_secret(ctx, &sealed)
            .map_err(|e| SecretFailure::new(id, Stage::Store, e))?;

        debug!(id, "secret re-encrypted");
        Ok(())
    }
}
