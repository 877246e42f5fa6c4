//! Secret encryption
//!
//! Uses age (X25519 + ChaCha20-Poly1305). Ciphertexts are written ASCII
//! armored so they diff cleanly in version control; both armored and
//! binary payloads are accepted on decryption.

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use anyhow::Result;
use std::io::{Read, Write};
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::model::{PrivateKeyList, PublicKeyList, Secret};

/// Encryption-specific errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("No recipients to encrypt to")]
    NoRecipients,

    #[error("No private keys to decrypt with")]
    NoIdentities,

    #[error("{id} has no {what} data")]
    MissingData { id: String, what: &'static str },
}

/// Encrypts and decrypts secret payloads
#[cfg_attr(test, mockall::automock)]
pub trait Encrypter: Send + Sync {
    /// Returns the secret with `encrypted_data` set
    fn encrypt(&self, ctx: &CancellationToken, secret: Secret, keys: &PublicKeyList) -> Result<Secret>;

    /// Returns the secret with `decrypted_data` set. Fails when no key in
    /// `keys` can open the payload.
    fn decrypt(&self, ctx: &CancellationToken, secret: Secret, keys: &PrivateKeyList) -> Result<Secret>;
}

/// age backed encrypter
#[derive(Debug, Default, Clone, Copy)]
pub struct AgeEncrypter;

impl AgeEncrypter {
    pub fn new() -> Self {
        Self
    }
}

impl Encrypter for AgeEncrypter {
    fn encrypt(&self, ctx: &CancellationToken, mut secret: Secret, keys: &PublicKeyList) -> Result<Secret> {
        ctx.check()?;

        let plaintext = secret.decrypted_data.as_deref().ok_or_else(|| CryptoError::MissingData {
            id: secret.id.clone(),
            what: "decrypted",
        })?;

        let encrypted = seal(plaintext, keys)?;
        secret.encrypted_data = Some(encrypted);
        Ok(secret)
    }

    fn decrypt(&self, ctx: &CancellationToken, mut secret: Secret, keys: &PrivateKeyList) -> Result<Secret> {
        ctx.check()?;

        let encrypted = secret.encrypted_data.as_deref().ok_or_else(|| CryptoError::MissingData {
            id: secret.id.clone(),
            what: "encrypted",
        })?;

        let decrypted = open(encrypted, keys)?;
        secret.decrypted_data = Some(decrypted);
        Ok(secret)
    }
}

fn seal(plaintext: &[u8], keys: &PublicKeyList) -> std::result::Result<Vec<u8>, CryptoError> {
    if keys.is_empty() {
        return Err(CryptoError::NoRecipients);
    }

    let recipients: Vec<Box<dyn age::Recipient + Send>> = keys
        .iter()
        .map(|k| Box::new(k.clone()) as Box<dyn age::Recipient + Send>)
        .collect();
    let encryptor = age::Encryptor::with_recipients(recipients).ok_or(CryptoError::NoRecipients)?;

    let mut encrypted = vec![];
    let armored = ArmoredWriter::wrap_output(&mut encrypted, Format::AsciiArmor)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let mut writer = encryptor
        .wrap_output(armored)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    writer
        .write_all(plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    writer
        .finish()
        .and_then(|armor| armor.finish())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(encrypted)
}

fn open(encrypted: &[u8], keys: &PrivateKeyList) -> std::result::Result<Vec<u8>, CryptoError> {
    if keys.is_empty() {
        return Err(CryptoError::NoIdentities);
    }

    let decryptor = match age::Decryptor::new(ArmoredReader::new(encrypted))
        .map_err(|e| CryptoError::Decryption(e.to_string()))?
    {
        age::Decryptor::Recipients(d) => d,
        _ => {
            return Err(CryptoError::Decryption(
                "Unexpected passphrase encryption".to_string(),
            ))
        }
    };

    let mut decrypted = vec![];
    let mut reader = decryptor
        .decrypt(keys.iter().map(|k| k as &dyn age::Identity))
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;

    reader
        .read_to_end(&mut decrypted)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;

    Ok(decrypted)
}
