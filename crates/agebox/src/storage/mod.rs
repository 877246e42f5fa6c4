//! Storage capabilities
//!
//! Box operations only see these traits. The filesystem implementations
//! live in the submodules.

mod keys;
mod secrets;
mod track;

pub use keys::FsKeyRepository;
pub use secrets::FsSecretRepository;
pub use track::FsTrackRepository;

use anyhow::Result;
use std::path::PathBuf;
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::model::{PrivateKeyList, PublicKeyList, Secret, SecretRegistry};

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Keys not found at {0}")]
    KeysNotFound(PathBuf),

    #[error("Invalid key in {path}:{line}: {reason}")]
    InvalidKey {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Unsupported registry version {found} (max {supported})")]
    UnsupportedRegistry { found: u32, supported: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads key material
#[cfg_attr(test, mockall::automock)]
pub trait KeyRepository: Send + Sync {
    /// Every private key available for decryption
    fn list_private_keys(&self, ctx: &CancellationToken) -> Result<PrivateKeyList>;

    /// Every recipient new ciphertexts are encrypted to
    fn list_public_keys(&self, ctx: &CancellationToken) -> Result<PublicKeyList>;
}

/// Reads and writes secret payloads by canonical id
#[cfg_attr(test, mockall::automock)]
pub trait SecretRepository: Send + Sync {
    /// Current encrypted payload
    fn get_encrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<Secret>;

    /// Current plaintext payload
    fn get_decrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<Secret>;

    fn save_encrypted_secret(&self, ctx: &CancellationToken, secret: &Secret) -> Result<()>;

    fn save_decrypted_secret(&self, ctx: &CancellationToken, secret: &Secret) -> Result<()>;

    fn delete_encrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<()>;

    fn delete_decrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<()>;

    fn exists_decrypted_secret(&self, ctx: &CancellationToken, id: &str) -> Result<bool>;
}

/// Loads and saves the tracking registry as a whole
#[cfg_attr(test, mockall::automock)]
pub trait TrackRepository: Send + Sync {
    fn get_secret_registry(&self, ctx: &CancellationToken) -> Result<SecretRegistry>;

    fn save_secret_registry(&self, ctx: &CancellationToken, registry: &SecretRegistry) -> Result<()>;
}
