//! Filesystem secret repository
//!
//! The plaintext of secret `db/pass` lives at `<root>/db/pass`, its
//! ciphertext at `<root>/db/pass.agebox`.

use anyhow::{Context, Result};
use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{SecretRepository, StorageError};
use crate::cancel::CancellationToken;
use crate::model::Secret;

pub struct FsSecretRepository {
    root: PathBuf,
    extension: String,
}

impl FsSecretRepository {
    pub fn new(root: &Path, extension: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            extension: extension.to_string(),
        }
    }

    fn decrypted_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn encrypted_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}{}", id, self.extension))
    }

    fn read(&self, id: &str, path: &Path) -> Result<Vec<u8>> {
        if !path.is_file() {
            return Err(StorageError::NotFound(id.to_string()).into());
        }
        fs::read(path).with_context(|| format!("Failed to read {:?}", path))
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data).with_context(|| format!("Failed to write {:?}", path))?;
        fs::set_permissions(path, Permissions::from_mode(mode))?;
        Ok(())
    }

    fn remove(&self, id: &str, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(StorageError::NotFound(id.to_string()).into());
        }
        fs::remove_file(path).with_context(|| format!("Failed to remove {:?}", path))
    }
}

impl SecretRepository for FsSecretRepository {
    fn get_encrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<Secret> {
        ctx.check()?;
        let data = self.read(id, &self.encrypted_path(id))?;
        Ok(Secret::encrypted(id, data))
    }

    fn get_decrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<Secret> {
        ctx.check()?;
        let data = self.read(id, &self.decrypted_path(id))?;
        Ok(Secret::decrypted(id, data))
    }

    fn save_encrypted_secret(&self, ctx: &CancellationToken, secret: &Secret) -> Result<()> {
        ctx.check()?;
        let data = secret
            .encrypted_data
            .as_deref()
            .with_context(|| format!("{} has no encrypted data", secret.id))?;
        self.write(&self.encrypted_path(&secret.id), data, 0o644)
    }

    fn save_decrypted_secret(&self, ctx: &CancellationToken, secret: &Secret) -> Result<()> {
        ctx.check()?;
        let data = secret
            .decrypted_data
            .as_deref()
            .with_context(|| format!("{} has no decrypted data", secret.id))?;
        // Plaintext is only readable by the owner
        self.write(&self.decrypted_path(&secret.id), data, 0o600)
    }

    fn delete_encrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<()> {
        ctx.check()?;
        self.remove(id, &self.encrypted_path(id))
    }

    fn delete_decrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<()> {
        ctx.check()?;
        self.remove(id, &self.decrypted_path(id))
    }

    fn exists_decrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<bool> {
        ctx.check()?;
        Ok(self.decrypted_path(id).is_file())
    }
}
