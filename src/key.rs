//! Key material for secure-mode embedding.
//!
//! A [`Key`] is an opaque 32-byte hash block derived from a password, a
//! key file's contents, or a fixed default. It is owned by the tracking
//! group that created it and never persisted in plaintext; key bytes are
//! zeroized on drop and redacted from debug output.

use std::fmt;
use std::fs;
use std::path::Path;

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

use crate::{BOOTSTRAP_SEED, PRODUCT_UUID_SIZE};

/// Length of key material in bytes.
pub const KEY_SIZE: usize = 32;

/// HKDF salt for password-derived keys.
const SALT_PASSWORD: &[u8] = b"STEGBACK-KEY-V1";

/// Errors that can occur while deriving key material.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("key file error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Opaque fixed-length key material.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    bytes: [u8; KEY_SIZE],
}

impl Key {
    /// Derives a key from a password.
    pub fn from_password(password: &str) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(SALT_PASSWORD), password.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"key-bytes", &mut bytes)
            .expect("HKDF expand should not fail");
        Self { bytes }
    }

    /// Derives a key from the contents of a key file.
    pub fn from_key_file<P: AsRef<Path>>(path: P) -> Result<Self, KeyError> {
        let contents = fs::read(path)?;
        Ok(Self {
            bytes: Sha256::digest(&contents).into(),
        })
    }

    /// The fixed default key used when a tracking group has no key of its
    /// own. Offers no secrecy, only the same wire behavior as a real key.
    pub fn default_key() -> Self {
        Self {
            bytes: Sha256::digest(BOOTSTRAP_SEED.to_be_bytes()).into(),
        }
    }

    /// Returns the raw key bytes.
    pub fn bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Builds the reseed bytes for the header-to-body transition:
    /// `sha256(key_bytes) || product_uuid_bytes`.
    ///
    /// Both the keystream and the permutation's stream are reseeded with
    /// this value once the 12-byte header is known, binding the remainder
    /// of the carrier to the key and to this specific fragment.
    pub fn secure_seed(&self, product_uuid: &[u8; PRODUCT_UUID_SIZE]) -> Vec<u8> {
        let mut seed = Vec::with_capacity(KEY_SIZE + PRODUCT_UUID_SIZE);
        seed.extend_from_slice(Sha256::digest(self.bytes).as_slice());
        seed.extend_from_slice(product_uuid);
        seed
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Don't expose key material in debug output
        f.debug_struct("Key").field("bytes", &"[REDACTED]").finish()
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_derivation_deterministic() {
        let a = Key::from_password("hunter2");
        let b = Key::from_password("hunter2");
        assert_eq!(a.bytes(), b.bytes());
    }

    #[test]
    fn test_different_passwords_differ() {
        let a = Key::from_password("hunter2");
        let b = Key::from_password("hunter3");
        assert_ne!(a.bytes(), b.bytes());
    }

    #[test]
    fn test_key_file_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.key");
        fs::write(&path, b"arbitrary key file contents").unwrap();

        let a = Key::from_key_file(&path).unwrap();
        let b = Key::from_key_file(&path).unwrap();
        assert_eq!(a.bytes(), b.bytes());
        assert_ne!(a.bytes(), Key::default_key().bytes());
    }

    #[test]
    fn test_missing_key_file_fails() {
        let result = Key::from_key_file("/no/such/key/file");
        assert!(matches!(result, Err(KeyError::IoError(_))));
    }

    #[test]
    fn test_secure_seed_binds_uuid() {
        let key = Key::from_password("pw");
        let uuid_a = [1u8; PRODUCT_UUID_SIZE];
        let uuid_b = [2u8; PRODUCT_UUID_SIZE];

        assert_eq!(key.secure_seed(&uuid_a), key.secure_seed(&uuid_a));
        assert_ne!(key.secure_seed(&uuid_a), key.secure_seed(&uuid_b));
        assert_eq!(key.secure_seed(&uuid_a).len(), KEY_SIZE + PRODUCT_UUID_SIZE);
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let key = Key::from_password("sensitive");
        let output = format!("{key:?}");
        assert!(output.contains("REDACTED"));
        assert!(!output.contains("sensitive"));
    }
}
