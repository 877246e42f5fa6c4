//! Registry housekeeping: init and untrack

use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use super::batch::{resolve_ids, run_batch};
use crate::cancel::CancellationToken;
use crate::error::{BoxError, SecretFailure, Stage};
use crate::process::IdProcessor;
use crate::storage::{SecretRepository, TrackRepository};

#[derive(Debug, Clone, Default)]
pub struct UntrackBoxRequest {
    pub secret_ids: Vec<String>,
    /// Also remove the encrypted file
    pub delete: bool,
}

pub struct ServiceConfig {
    pub secret_repo: Arc<dyn SecretRepository>,
    pub track_repo: Arc<dyn TrackRepository>,
    pub id_processor: Arc<dyn IdProcessor>,
}

pub struct Service {
    secret_repo: Arc<dyn SecretRepository>,
    track_repo: Arc<dyn TrackRepository>,
    id_processor: Arc<dyn IdProcessor>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            secret_repo: config.secret_repo,
            track_repo: config.track_repo,
            id_processor: config.id_processor,
        }
    }

    /// Make sure a registry exists. Idempotent, returns how many secrets
    /// are tracked.
    pub fn init(&self, ctx: &CancellationToken) -> Result<usize, BoxError> {
        let registry = self
            .track_repo
            .get_secret_registry(ctx)
            .map_err(|e| BoxError::precondition("secret registry", e))?;
        self.track_repo
            .save_secret_registry(ctx, &registry)
            .map_err(|e| BoxError::persist("secret registry", e))?;

        info!(tracked = registry.len(), "box initialized");
        Ok(registry.len())
    }

    /// Stop tracking secrets. Returns the ids removed from the registry.
    pub fn untrack_box(&self, ctx: &CancellationToken, req: UntrackBoxRequest) -> Result<Vec<String>, BoxError> {
        let resolved = resolve_ids(ctx, self.id_processor.as_ref(), &req.secret_ids)?;
        if resolved.ids.is_empty() {
            return Err(BoxError::NoSecrets);
        }

        let mut registry = self
            .track_repo
            .get_secret_registry(ctx)
            .map_err(|e| BoxError::precondition("secret registry", e))?;

        // Registry writes happen once, after the batch
        let outcome = run_batch(ctx, &resolved.ids, 1, |id| {
            if !registry.is_tracked(id) {
                return Err(SecretFailure::new(id, Stage::Track, anyhow!("secret is not tracked")));
            }
            if req.delete {
                self.secret_repo
                    .delete_encrypted_secret(ctx, id)
                    .map_err(|e| SecretFailure::new(id, Stage::Store, e))?;
            }
            Ok(())
        });

        for (id, _) in &outcome.done {
            registry.untrack(id);
        }
        // Files already changed on disk are recorded even after cancellation
        if !outcome.done.is_empty() {
            self.track_repo
                .save_secret_registry(&CancellationToken::new(), &registry)
                .map_err(|e| BoxError::persist("secret registry", e))?;
        }

        let done = outcome.conclude(resolved.failures)?;
        info!(untracked = done.len(), deleted = req.delete, "secrets untracked");
        Ok(done.into_iter().map(|(id, _)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{fingerprint, SecretRegistry};
    use crate::process::MockIdProcessor;
    use crate::storage::{MockSecretRepository, MockTrackRepository};

    fn processor() -> MockIdProcessor {
        let mut processor = MockIdProcessor::new();
        processor
            .expect_process_id()
            .returning(|_, raw| Ok(Some(raw.to_string())));
        processor
    }

    fn tracked(ids: &'static [&'static str]) -> MockTrackRepository {
        let mut track = MockTrackRepository::new();
        track.expect_get_secret_registry().returning(move |_| {
            let mut reg = SecretRegistry::default();
            for id in ids {
                reg.track(id, fingerprint(id.as_bytes()));
            }
            Ok(reg)
        });
        track
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut track = tracked(&["a"]);
        track
            .expect_save_secret_registry()
            .withf(|_, reg| reg.is_tracked("a"))
            .times(2)
            .returning(|_, _| Ok(()));

        let service = Service::new(ServiceConfig {
            secret_repo: Arc::new(MockSecretRepository::new()),
            track_repo: Arc::new(track),
            id_processor: Arc::new(processor()),
        });
        let ctx = CancellationToken::new();
        assert_eq!(service.init(&ctx).unwrap(), 1);
        assert_eq!(service.init(&ctx).unwrap(), 1);
    }

    #[test]
    fn test_untrack_and_delete() {
        let mut track = tracked(&["a", "b"]);
        track
            .expect_save_secret_registry()
            .withf(|_, reg| !reg.is_tracked("a") && reg.is_tracked("b"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut secrets = MockSecretRepository::new();
        secrets
            .expect_delete_encrypted_secret()
            .withf(|_, id| id == "a")
            .times(1)
            .returning(|_, _| Ok(()));

        let service = Service::new(ServiceConfig {
            secret_repo: Arc::new(secrets),
            track_repo: Arc::new(track),
            id_processor: Arc::new(processor()),
        });

        let err = service
            .untrack_box(
                &CancellationToken::new(),
                UntrackBoxRequest {
                    secret_ids: vec!["a".to_string(), "unknown".to_string()],
                    delete: true,
                },
            )
            .unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "unknown");
        assert_eq!(failures[0].stage, Stage::Track);
    }

    #[test]
    fn test_untrack_keeps_file_by_default() {
        let mut track = tracked(&["a"]);
        track
            .expect_save_secret_registry()
            .times(1)
            .returning(|_, _| Ok(()));
        let mut secrets = MockSecretRepository::new();
        secrets.expect_delete_encrypted_secret().never();

        let service = Service::new(ServiceConfig {
            secret_repo: Arc::new(secrets),
            track_repo: Arc::new(track),
            id_processor: Arc::new(processor()),
        });

        let done = service
            .untrack_box(
                &CancellationToken::new(),
                UntrackBoxRequest {
                    secret_ids: vec!["a".to_string()],
                    delete: false,
                },
            )
            .unwrap();
        assert_eq!(done, vec!["a"]);
    }
}
