//! Filesystem key repository
//!
//! A key path is either a single file or a directory walked recursively.
//! Key files hold one age key per line; `#` comments and blank lines are
//! skipped, which makes `age-keygen` output usable as is.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::{KeyRepository, StorageError};
use crate::cancel::CancellationToken;
use crate::model::{PrivateKeyList, PublicKeyList};

pub struct FsKeyRepository {
    public_keys: PathBuf,
    private_keys: PathBuf,
}

impl FsKeyRepository {
    pub fn new(public_keys: &Path, private_keys: &Path) -> Self {
        Self {
            public_keys: public_keys.to_path_buf(),
            private_keys: private_keys.to_path_buf(),
        }
    }
}

impl KeyRepository for FsKeyRepository {
    fn list_private_keys(&self, ctx: &CancellationToken) -> Result<PrivateKeyList> {
        let keys = load_keys(ctx, &self.private_keys, |line| {
            line.parse::<age::x25519::Identity>()
        })?;
        debug!(path = %self.private_keys.display(), count = keys.len(), "loaded private keys");
        Ok(PrivateKeyList::new(keys))
    }

    fn list_public_keys(&self, ctx: &CancellationToken) -> Result<PublicKeyList> {
        let keys = load_keys(ctx, &self.public_keys, |line| {
            line.parse::<age::x25519::Recipient>()
        })?;
        debug!(path = %self.public_keys.display(), count = keys.len(), "loaded public keys");
        Ok(PublicKeyList::new(keys))
    }
}

fn load_keys<K>(
    ctx: &CancellationToken,
    root: &Path,
    parse: impl Fn(&str) -> std::result::Result<K, &'static str>,
) -> Result<Vec<K>> {
    if !root.exists() {
        return Err(StorageError::KeysNotFound(root.to_path_buf()).into());
    }

    let mut keys = vec![];
    for file in key_files(root)? {
        ctx.check()?;

        let content = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read key file {:?}", file))?;

        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let key = parse(line).map_err(|reason| StorageError::InvalidKey {
                path: file.clone(),
                line: n + 1,
                reason: reason.to_string(),
            })?;
            keys.push(key);
        }
    }

    Ok(keys)
}

/// Regular, non hidden files under `root` in a stable order
fn key_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk keys at {:?}", root))?;
        let hidden = entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.');
        if entry.file_type().is_file() && !hidden {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use age::secrecy::ExposeSecret;
    use tempfile::TempDir;

    fn write_identity(path: &Path) -> age::x25519::Identity {
        let identity = age::x25519::Identity::generate();
        let content = format!(
            "# created: 2024-01-01T00:00:00Z\n# public key: {}\n{}\n",
            identity.to_public(),
            identity.to_string().expose_secret()
        );
        fs::write(path, content).unwrap();
        identity
    }

    #[test]
    fn test_private_keys_from_file() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("key.txt");
        write_identity(&key_path);

        let repo = FsKeyRepository::new(dir.path(), &key_path);
        let keys = repo.list_private_keys(&CancellationToken::new()).unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_public_keys_from_directory() {
        let dir = TempDir::new().unwrap();
        let keys_dir = dir.path().join("keys");
        fs::create_dir_all(keys_dir.join("team")).unwrap();

        let alice = age::x25519::Identity::generate().to_public();
        let bob = age::x25519::Identity::generate().to_public();
        fs::write(keys_dir.join("alice.pub"), format!("{}\n", alice)).unwrap();
        fs::write(keys_dir.join("team/bob.pub"), format!("# bob\n{}\n", bob)).unwrap();
        fs::write(keys_dir.join(".hidden"), "garbage").unwrap();

        let repo = FsKeyRepository::new(&keys_dir, dir.path());
        let keys = repo.list_public_keys(&CancellationToken::new()).unwrap();
        let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec![alice.to_string(), bob.to_string()]);
    }

    #[test]
    fn test_empty_key_directory_is_valid() {
        let dir = TempDir::new().unwrap();
        let repo = FsKeyRepository::new(dir.path(), dir.path());
        let keys = repo.list_private_keys(&CancellationToken::new()).unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_missing_keys_fail() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let repo = FsKeyRepository::new(&missing, &missing);

        let err = repo.list_private_keys(&CancellationToken::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::KeysNotFound(_))
        ));
    }

    #[test]
    fn test_malformed_key_fails() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("key.txt");
        fs::write(&key_path, "# comment\nAGE-SECRET-KEY-NOTAKEY\n").unwrap();

        let repo = FsKeyRepository::new(dir.path(), &key_path);
        let err = repo.list_private_keys(&CancellationToken::new()).unwrap_err();
        match err.downcast_ref::<StorageError>() {
            Some(StorageError::InvalidKey { line, .. }) => assert_eq!(*line, 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_load_fails() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("key.txt");
        write_identity(&key_path);

        let ctx = CancellationToken::new();
        ctx.cancel();
        let repo = FsKeyRepository::new(dir.path(), &key_path);
        assert!(repo.list_private_keys(&ctx).is_err());
    }
}
