//! Sealing of the biometric credential bundle at rest
//!
//! The bundle is encrypted with ChaCha20-Poly1305 under a 32-byte device key
//! before it reaches the key-value store.
//!
//! # Sealed Format
//!
//! Lowercase hex of:
//! - 12-byte nonce
//! - ciphertext
//! - 16-byte authentication tag (appended by ChaCha20-Poly1305)

use std::path::Path;

use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Size of the nonce for ChaCha20-Poly1305
const NONCE_SIZE: usize = 12;

/// Size of the device key
pub const KEY_SIZE: usize = 32;

/// Encrypts and decrypts small secrets with a fixed key
pub struct CredentialSealer {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl CredentialSealer {
    /// Create a sealer from raw key bytes
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Derive the key from a passphrase with Argon2id
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
            .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
        Ok(Self { key })
    }

    /// Encrypt `plaintext` under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key[..])
            .map_err(|e| Error::Crypto(format!("Invalid key: {}", e)))?;

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(hex::encode(sealed))
    }

    /// Decrypt a value produced by [`seal`](Self::seal)
    pub fn open(&self, sealed: &str) -> Result<Zeroizing<Vec<u8>>> {
        let data = hex::decode(sealed.trim()).map_err(|_| Error::DecryptionFailed)?;

        if data.len() < NONCE_SIZE {
            return Err(Error::DecryptionFailed);
        }

        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        let ciphertext = &data[NONCE_SIZE..];

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key[..])
            .map_err(|e| Error::Crypto(format!("Invalid key: {}", e)))?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::DecryptionFailed)?;

        Ok(Zeroizing::new(plaintext))
    }
}

/// Per-device sealing key kept in a private file
///
/// Stands in for a platform keystore on hosts that have none.
pub struct DeviceKey;

impl DeviceKey {
    /// Load the key at `path`, generating it on first use
    pub fn load_or_create(path: &Path) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        if path.exists() {
            let bytes = Zeroizing::new(std::fs::read(path)?);
            if bytes.len() != KEY_SIZE {
                return Err(Error::Crypto(format!(
                    "Invalid device key size: {} bytes",
                    bytes.len()
                )));
            }
            let mut key = Zeroizing::new([0u8; KEY_SIZE]);
            key.copy_from_slice(&bytes);
            return Ok(key);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut key[..]);

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("key.tmp");
        std::fs::write(&temp_path, &key[..])?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&temp_path, path)?;
        info!(path = %path.display(), "Generated new device key");

        Ok(key)
    }
}
