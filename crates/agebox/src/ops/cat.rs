//! Print a secret without writing its plaintext to disk

use std::sync::Arc;

use tracing::debug;

use super::batch::resolve_ids;
use crate::cancel::CancellationToken;
use crate::encrypt::Encrypter;
use crate::error::{AggregateError, BoxError, SecretFailure, Stage};
use crate::process::IdProcessor;
use crate::storage::{KeyRepository, SecretRepository};

pub struct ServiceConfig {
    pub key_repo: Arc<dyn KeyRepository>,
    pub secret_repo: Arc<dyn SecretRepository>,
    pub encrypter: Arc<dyn Encrypter>,
    pub id_processor: Arc<dyn IdProcessor>,
}

pub struct Service {
    key_repo: Arc<dyn KeyRepository>,
    secret_repo: Arc<dyn SecretRepository>,
    encrypter: Arc<dyn Encrypter>,
    id_processor: Arc<dyn IdProcessor>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            key_repo: config.key_repo,
            secret_repo: config.secret_repo,
            encrypter: config.encrypter,
            id_processor: config.id_processor,
        }
    }

    /// Decrypt one secret in memory and return its plaintext
    pub fn cat(&self, ctx: &CancellationToken, secret_id: &str) -> Result<Vec<u8>, BoxError> {
        let resolved = resolve_ids(ctx, self.id_processor.as_ref(), &[secret_id.to_string()])?;
        if let Some(agg) = AggregateError::from_failures(resolved.failures) {
            return Err(agg.into());
        }
        let Some(id) = resolved.ids.into_iter().next() else {
            return Err(BoxError::NoSecrets);
        };

        let keys = self
            .key_repo
            .list_private_keys(ctx)
            .map_err(|e| BoxError::precondition("private keys", e))?;

        let fail = |stage: Stage, e: anyhow::Error| BoxError::single(SecretFailure::new(id.as_str(), stage, e));

        let secret = self
            .secret_repo
            .get_encrypted_secret(ctx, &id)
            .map_err(|e| fail(Stage::Fetch, e))?;
        let secret = self
            .encrypter
            .decrypt(ctx, secret, &keys)
            .map_err(|e| fail(Stage::Decrypt, e))?;

        debug!(id = %id, "secret decrypted in memory");
        Ok(secret.decrypted_data.unwrap_or_default())
    }
}
