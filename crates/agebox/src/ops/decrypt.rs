//! Box decryption: tracked ciphertexts are opened next to their
//! encrypted files

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info};

use super::batch::{resolve_ids, run_batch};
use crate::cancel::CancellationToken;
use crate::encrypt::Encrypter;
use crate::error::{BoxError, SecretFailure, Stage};
use crate::model::{PrivateKeyList, SecretRegistry};
use crate::process::IdProcessor;
use crate::storage::{KeyRepository, SecretRepository, TrackRepository};

#[derive(Debug, Clone, Default)]
pub struct DecryptBoxRequest {
    /// Raw ids; empty means every tracked secret
    pub secret_ids: Vec<String>,
    /// Overwrite plaintext files that already exist
    pub force: bool,
}

/// What happened to each decrypted secret
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecryptReport {
    pub decrypted: Vec<String>,
    /// Plaintext already present and `force` not set
    pub skipped: Vec<String>,
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

    pub fn decrypt_box(&self, ctx: &CancellationToken, req: DecryptBoxRequest) -> Result<DecryptReport, BoxError> {
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

        let keys = self
            .key_repo
            .list_private_keys(ctx)
            .map_err(|e| BoxError::precondition("private keys", e))?;

        info!(in_scope = resolved.ids.len(), force = req.force, "decrypting box");

        let outcome = run_batch(ctx, &resolved.ids, self.workers, |id| {
            self.decrypt_secret(ctx, id, &registry, &keys, req.force)
        });

        let mut report = DecryptReport::default();
        for (id, written) in outcome.conclude(resolved.failures)? {
            if written {
                report.decrypted.push(id);
            } else {
                report.skipped.push(id);
            }
        }

        info!(decrypted = report.decrypted.len(), skipped = report.skipped.len(), "box decrypted");
        Ok(report)
    }

    /// Returns false when the secret was skipped
    fn decrypt_secret(
        &self,
        ctx: &CancellationToken,
        id: &str,
        registry: &SecretRegistry,
        keys: &PrivateKeyList,
        force: bool,
    ) -> Result<bool, SecretFailure> {
        if !registry.is_tracked(id) {
            return Err(SecretFailure::new(id, Stage::Track, anyhow!("secret is not tracked")));
        }

        if !force {
            let exists = self
                .secret_repo
                .exists_decrypted_secret(ctx, id)
                .map_err(|e| SecretFailure::new(id, Stage::Fetch, e))?;
            if exists {
                debug!(id, "plaintext exists, skipping");
                return Ok(false);
            }
        }

        let secret = self
            .secret_repo
            .get_encrypted_secret(ctx, id)
            .map_err(|e| SecretFailure::new(id, Stage::Fetch, e))?;
        let secret = self
            .encrypter
            .decrypt(ctx, secret, keys)
            .map_err(|e| SecretFailure::new(id, Stage::Decrypt, e))?;
        self.secret_repo
            .save_decrypted_secret(ctx, &secret)
            .map_err(|e| SecretFailure::new(id, Stage::Store, e))?;

        debug!(id, "secret decrypted");
        Ok(true)
    }
}
