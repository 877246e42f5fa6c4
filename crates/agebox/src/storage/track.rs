//! Filesystem registry repository (YAML)

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StorageError, TrackRepository};
use crate::cancel::CancellationToken;
use crate::model::SecretRegistry;

pub struct FsTrackRepository {
    path: PathBuf,
}

impl FsTrackRepository {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl TrackRepository for FsTrackRepository {
    fn get_secret_registry(&self, ctx: &CancellationToken) -> Result<SecretRegistry> {
        ctx.check()?;

        if !self.path.exists() {
            return Ok(SecretRegistry::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read registry from {:?}", self.path))?;
        let registry: SecretRegistry = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse registry from {:?}", self.path))?;

        if registry.version > SecretRegistry::VERSION {
            return Err(StorageError::UnsupportedRegistry {
                found: registry.version,
                supported: SecretRegistry::VERSION,
            }
            .into());
        }

        debug!(path = %self.path.display(), tracked = registry.len(), "loaded registry");
        Ok(registry)
    }

    fn save_secret_registry(&self, ctx: &CancellationToken, registry: &SecretRegistry) -> Result<()> {
        ctx.check()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(registry)?;

        // Write then rename so readers never see a partial registry
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = self.path.with_file_name(format!(".{}.tmp", file_name));
        fs::write(&tmp, content).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace registry at {:?}", self.path))?;

        debug!(path = %self.path.display(), tracked = registry.len(), "saved registry");
        Ok(())
    }
}
