//! Box encryption: plaintext files become tracked ciphertexts

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info};

use super::batch::{resolve_ids, run_batch};
use crate::cancel::CancellationToken;
use crate::encrypt::Encrypter;
use crate::error::{BoxError, SecretFailure, Stage};
use crate::model::{fingerprint, PublicKeyList};
use crate::process::IdProcessor;
use crate::storage::{KeyRepository, SecretRepository, TrackRepository};

#[derive(Debug, Clone, Default)]
pub struct EncryptBoxRequest {
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

    /// Encrypt the requested plaintext files, remove the plaintext and
    /// track them. Returns the ids encrypted.
    ///
    /// The registry is saved once after the batch with every secret that
    /// was encrypted, even when others failed.
    pub fn encrypt_box(&self, ctx: &CancellationToken, req: EncryptBoxRequest) -> Result<Vec<String>, BoxError> {
        let resolved = resolve_ids(ctx, self.id_processor.as_ref(), &req.secret_ids)?;
        if resolved.ids.is_empty() {
            return Err(BoxError::NoSecrets);
        }

        let keys = self
            .key_repo
            .list_public_keys(ctx)
            .map_err(|e| BoxError::precondition("public keys", e))?;
        let mut registry = self
            .track_repo
            .get_secret_registry(ctx)
            .map_err(|e| BoxError::precondition("secret registry", e))?;

        info!(in_scope = resolved.ids.len(), recipients = keys.len(), "encrypting box");

        let outcome = run_batch(ctx, &resolved.ids, self.workers, |id| self.encrypt_secret(ctx, id, &keys));

        for (id, fp) in &outcome.done {
            registry.track(id, fp.clone());
        }
        // Files already changed on disk are recorded even after cancellation
        if !outcome.done.is_empty() {
            self.track_repo
                .save_secret_registry(&CancellationToken::new(), &registry)
                .map_err(|e| BoxError::persist("secret registry", e))?;
        }

        let done = outcome.conclude(resolved.failures)?;
        info!(encrypted = done.len(), "box encrypted");
        Ok(done.into_iter().map(|(id, _)| id).collect())
    }

    /// Returns the plaintext fingerprint to record
    fn encrypt_secret(&self, ctx: &CancellationToken, id: &str, keys: &PublicKeyList) -> Result<String, SecretFailure> {
        let secret = self
            .secret_repo
            .get_decrypted_secret(ctx, id)
            .map_err(|e| SecretFailure::new(id, Stage::Fetch, e))?;

        if !secret.is_decrypted() {
            return Err(SecretFailure::new(id, Stage::Fetch, anyhow!("empty secrets are not allowed")));
        }
        let fp = fingerprint(secret.decrypted_data.as_deref().unwrap_or_default());

        let secret = self
            .encrypter
            .encrypt(ctx, secret, keys)
            .map_err(|e| SecretFailure::new(id, Stage::Encrypt, e))?;

        self.secret_repo
            .save_encrypted_secret(ctx, &secret)
            .map_err(|e| SecretFailure::new(id, Stage::Store, e))?;
        self.secret_repo
            .delete_decrypted_secret(ctx, id)
            .map_err(|e| SecretFailure::new(id, Stage::Store, e))?;

        debug!(id, "secret encrypted");
        Ok(fp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::MockEncrypter;
    use crate::model::{Secret, SecretRegistry};
    use crate::process::MockIdProcessor;
    use crate::storage::{MockKeyRepository, MockSecretRepository, MockTrackRepository};

    #[derive(Default)]
    struct Mocks {
        keys: MockKeyRepository,
        secrets: MockSecretRepository,
        track: MockTrackRepository,
        encrypter: MockEncrypter,
        processor: MockIdProcessor,
    }

    impl Mocks {
        fn passthrough_ids(&mut self) {
            self.processor
                .expect_process_id()
                .returning(|_, raw| Ok(Some(raw.to_string())));
        }

        fn plaintext(&mut self, id: &'static str, data: &'static [u8]) {
            self.secrets
                .expect_get_decrypted_secret()
                .withf(move |_, got| got == id)
                .times(1)
                .returning(move |_, got| Ok(Secret::decrypted(got, data.to_vec())));
        }

        fn service(self) -> Service {
            Service::new(ServiceConfig {
                key_repo: Arc::new(self.keys),
                secret_repo: Arc::new(self.secrets),
                track_repo: Arc::new(self.track),
                encrypter: Arc::new(self.encrypter),
                id_processor: Arc::new(self.processor),
                workers: 1,
            })
        }
    }

    fn request(ids: &[&str]) -> EncryptBoxRequest {
        EncryptBoxRequest {
            secret_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_encrypt_tracks_successes_even_on_failure() {
        let mut m = Mocks::default();
        m.passthrough_ids();
        m.keys
            .expect_list_public_keys()
            .times(1)
            .returning(|_| Ok(PublicKeyList::default()));
        m.track
            .expect_get_secret_registry()
            .times(1)
            .returning(|_| Ok(SecretRegistry::default()));

        m.plaintext("a", b"one");
        m.secrets
            .expect_get_decrypted_secret()
            .withf(|_, id| id == "missing")
            .times(1)
            .returning(|_, _| Err(anyhow!("not found")));
        m.encrypter.expect_encrypt().times(1).returning(|_, mut s, _| {
            s.encrypted_data = Some(b"cipher".to_vec());
            Ok(s)
        });
        m.secrets
            .expect_save_encrypted_secret()
            .withf(|_, s| s.id == "a" && s.encrypted_data.is_some())
            .times(1)
            .returning(|_, _| Ok(()));
        m.secrets
            .expect_delete_decrypted_secret()
            .withf(|_, id| id == "a")
            .times(1)
            .returning(|_, _| Ok(()));
        m.track
            .expect_save_secret_registry()
            .withf(|_, reg| {
                reg.len() == 1 && reg.get("a").map(|t| t.fingerprint.as_str()) == Some(fingerprint(b"one").as_str())
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let err = m.service().encrypt_box(&CancellationToken::new(), request(&["a", "missing"])).unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "missing");
    }

    #[test]
    fn test_public_key_failure_stops_everything() {
        let mut m = Mocks::default();
        m.passthrough_ids();
        m.keys
            .expect_list_public_keys()
            .times(1)
            .returning(|_| Err(anyhow!("no keys dir")));
        m.track.expect_get_secret_registry().never();
        m.secrets.expect_get_decrypted_secret().never();

        let err = m.service().encrypt_box(&CancellationToken::new(), request(&["a"])).unwrap_err();
        assert!(matches!(err, BoxError::Precondition { what: "public keys", .. }));
    }

    #[test]
    fn test_empty_plaintext_is_rejected() {
        let mut m = Mocks::default();
        m.passthrough_ids();
        m.keys
            .expect_list_public_keys()
            .returning(|_| Ok(PublicKeyList::default()));
        m.track
            .expect_get_secret_registry()
            .returning(|_| Ok(SecretRegistry::default()));
        m.plaintext("a", b"");
        m.encrypter.expect_encrypt().never();
        m.track.expect_save_secret_registry().never();

        let err = m.service().encrypt_box(&CancellationToken::new(), request(&["a"])).unwrap_err();
        assert_eq!(err.failures()[0].stage, Stage::Fetch);
    }

    #[test]
    fn test_cancelled_encrypt_still_records_finished_secrets() {
        let ctx = CancellationToken::new();
        let mut m = Mocks::default();
        m.passthrough_ids();
        m.keys
            .expect_list_public_keys()
            .returning(|_| Ok(PublicKeyList::default()));
        m.track
            .expect_get_secret_registry()
            .returning(|_| Ok(SecretRegistry::default()));
        m.plaintext("a", b"one");
        m.encrypter.expect_encrypt().times(1).returning(|_, mut s, _| {
            s.encrypted_data = Some(b"cipher".to_vec());
            Ok(s)
        });
        m.secrets
            .expect_save_encrypted_secret()
            .times(1)
            .returning(|_, _| Ok(()));
        let inner = ctx.clone();
        m.secrets
            .expect_delete_decrypted_secret()
            .times(1)
            .returning(move |_, _| {
                inner.cancel();
                Ok(())
            });
        m.track
            .expect_save_secret_registry()
            .withf(|ctx, reg| !ctx.is_cancelled() && reg.is_tracked("a") && !reg.is_tracked("b"))
            .times(1)
            .returning(|_, _| Ok(()));

        let err = m.service().encrypt_box(&ctx, request(&["a", "b"])).unwrap_err();
        assert!(matches!(err, BoxError::Cancelled));
    }

    #[test]
    fn test_cancelled_while_loading_keys() {
        let ctx = CancellationToken::new();
        let inner = ctx.clone();
        let mut m = Mocks::default();
        m.passthrough_ids();
        m.keys.expect_list_public_keys().times(1).returning(move |_| {
            inner.cancel();
            inner.check()?;
            Ok(PublicKeyList::default())
        });
        m.track.expect_get_secret_registry().never();

        let err = m.service().encrypt_box(&ctx, request(&["a"])).unwrap_err();
        assert!(matches!(err, BoxError::Cancelled));
    }

    #[test]
    fn test_nothing_in_scope() {
        let mut m = Mocks::default();
        m.keys.expect_list_public_keys().never();
        let err = m.service().encrypt_box(&CancellationToken::new(), request(&[])).unwrap_err();
        assert!(matches!(err, BoxError::NoSecrets));
    }
}
