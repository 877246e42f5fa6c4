//! Box validation
//!
//! Answers "is this set of secrets, as currently stored, valid?". Every
//! in-scope secret must have an encrypted payload and, when decryption is
//! requested, that payload must open with one of the available private
//! keys. Per-secret problems are collected and reported together.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info};

use super::batch::{resolve_ids, run_batch};
use crate::cancel::CancellationToken;
use crate::encrypt::Encrypter;
use crate::error::{BoxError, SecretFailure, Stage};
use crate::model::PrivateKeyList;
use crate::process::IdProcessor;
use crate::storage::{KeyRepository, SecretRepository};

/// Which secrets to validate and how deeply
#[derive(Debug, Clone, Default)]
pub struct ValidateBoxRequest {
    /// Raw ids, processed in order
    pub secret_ids: Vec<String>,
    /// Also check that every payload decrypts
    pub decrypt: bool,
}

pub struct ServiceConfig {
    pub key_repo: Arc<dyn KeyRepository>,
    pub secret_repo: Arc<dyn SecretRepository>,
    pub encrypter: Arc<dyn Encrypter>,
    pub id_processor: Arc<dyn IdProcessor>,
    /// Secrets checked in parallel, 1 runs sequentially
    pub workers: usize,
}

pub struct Service {
    key_repo: Arc<dyn KeyRepository>,
    secret_repo: Arc<dyn SecretRepository>,
    encrypter: Arc<dyn Encrypter>,
    id_processor: Arc<dyn IdProcessor>,
    workers: usize,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            key_repo: config.key_repo,
            secret_repo: config.secret_repo,
            encrypter: config.encrypter,
            id_processor: config.id_processor,
            workers: config.workers.max(1),
        }
    }

    /// Validate the requested secrets.
    ///
    /// Fails fast with `NoSecrets` when nothing is in scope and with
    /// `Precondition` when private keys cannot be loaded. Otherwise every
    /// in-scope secret is checked and all failures, including ids that
    /// could not be resolved, come back as one `Failed` error.
    pub fn validate_box(&self, ctx: &CancellationToken, req: ValidateBoxRequest) -> Result<(), BoxError> {
        let resolved = resolve_ids(ctx, self.id_processor.as_ref(), &req.secret_ids)?;
        if resolved.ids.is_empty() {
            return Err(BoxError::NoSecrets);
        }

        let keys = if req.decrypt {
            let keys = self
                .key_repo
                .list_private_keys(ctx)
                .map_err(|e| BoxError::precondition("private keys", e))?;
            Some(keys)
        } else {
            None
        };

        info!(
            requested = req.secret_ids.len(),
            in_scope = resolved.ids.len(),
            decrypt = req.decrypt,
            "validating box"
        );

        let outcome = run_batch(ctx, &resolved.ids, self.workers, |id| {
            self.validate_secret(ctx, id, keys.as_ref())
        });
        let valid = outcome.done.len();
        outcome.conclude(resolved.failures)?;

        info!(valid, "box is valid");
        Ok(())
    }

    fn validate_secret(
        &self,
        ctx: &CancellationToken,
        id: &str,
        keys: Option<&PrivateKeyList>,
    ) -> Result<(), SecretFailure> {
        let secret = self
            .secret_repo
            .get_encrypted_secret(ctx, id)
            .map_err(|e| SecretFailure::new(id, Stage::Fetch, e))?;

        if let Some(keys) = keys {
            let secret = self
                .encrypter
                .decrypt(ctx, secret, keys)
                .map_err(|e| SecretFailure::new(id, Stage::Decrypt, e))?;

            if !secret.is_decrypted() {
                return Err(SecretFailure::new(id, Stage::Decrypt, anyhow!("decrypted payload is empty")));
            }
        }

        debug!(id, "secret valid");
        Ok(())
    }
}
