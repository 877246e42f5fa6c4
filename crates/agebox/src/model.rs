//! Domain model: secrets, key material and the tracking registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// One managed secret file.
///
/// Instances are built per operation and never cached. Data that has not
/// been loaded yet is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    /// Canonical id (path relative to the box root)
    pub id: String,
    pub encrypted_data: Option<Vec<u8>>,
    pub decrypted_data: Option<Vec<u8>>,
}

impl Secret {
    pub fn encrypted(id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            encrypted_data: Some(data),
            decrypted_data: None,
        }
    }

    pub fn decrypted(id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            encrypted_data: None,
            decrypted_data: Some(data),
        }
    }

    /// True only when a non-empty plaintext is present
    pub fn is_decrypted(&self) -> bool {
        self.decrypted_data.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// Private key material available for decryption. Empty is valid: every
/// decryption attempt then fails at the encrypter.
#[derive(Default)]
pub struct PrivateKeyList {
    keys: Vec<age::x25519::Identity>,
}

impl PrivateKeyList {
    pub fn new(keys: Vec<age::x25519::Identity>) -> Self {
        Self { keys }
    }

    pub fn iter(&self) -> impl Iterator<Item = &age::x25519::Identity> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for PrivateKeyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        f.debug_struct("PrivateKeyList")
            .field("len", &self.keys.len())
            .finish()
    }
}

/// Recipients a secret is encrypted to
#[derive(Clone, Default)]
pub struct PublicKeyList {
    keys: Vec<age::x25519::Recipient>,
}

impl PublicKeyList {
    pub fn new(keys: Vec<age::x25519::Recipient>) -> Self {
        Self { keys }
    }

    pub fn iter(&self) -> impl Iterator<Item = &age::x25519::Recipient> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for PublicKeyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| k.to_string()))
            .finish()
    }
}

/// Metadata recorded for a tracked secret at its last successful encrypt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSecret {
    /// SHA-256 of the plaintext, hex encoded
    pub fingerprint: String,
    pub encrypted_at: DateTime<Utc>,
}

/// Persisted mapping from canonical secret id to tracked metadata.
///
/// Source of truth for "is this secret tracked". Only encrypt and untrack
/// write it; validation only reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRegistry {
    pub version: u32,
    #[serde(default)]
    pub secrets: BTreeMap<String, TrackedSecret>,
}

impl Default for SecretRegistry {
    fn default() -> Self {
        Self {
            version: SecretRegistry::VERSION,
            secrets: BTreeMap::new(),
        }
    }
}

impl SecretRegistry {
    pub const VERSION: u32 = 1;

    /// Record (or refresh) a secret as tracked
    pub fn track(&mut self, id: &str, fingerprint: String) {
        self.secrets.insert(
            id.to_string(),
            TrackedSecret {
                fingerprint,
                encrypted_at: Utc::now(),
            },
        );
    }

    /// Stop tracking a secret, returns false if it was not tracked
    pub fn untrack(&mut self, id: &str) -> bool {
        self.secrets.remove(id).is_some()
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.secrets.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TrackedSecret> {
        self.secrets.get(id)
    }

    /// Tracked ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.secrets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

/// Content fingerprint stored in the registry
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
