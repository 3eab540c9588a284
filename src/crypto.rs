//! Master-key sealing for privileged plaintext and snapshots
//!
//! The scrambler is deliberately not cryptography (see `scrambler`); anything
//! that actually needs confidentiality (the privileged plaintext store, the
//! persisted snapshot, sealed error context) goes through AES-256-GCM here.

use crate::{Result, ShroudError};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use std::env;

pub const KEY_SIZE: usize = 32; // 256 bits
pub const NONCE_SIZE: usize = 12; // 96 bits

/// Environment variable the credentials vault exposes the key material under.
pub const VAULT_KEY_ENV: &str = "SHROUD_MASTER_KEY";

/// Master key material supplied by the credentials vault.
///
/// Held in memory only; the orchestrator never persists it.
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Parse 64-character hex key material.
    pub fn from_hex(material: &str) -> Result<Self> {
        let bytes = hex::decode(material.trim())
            .map_err(|e| ShroudError::Vault(format!("invalid key material: {}", e)))?;
        if bytes.len() != KEY_SIZE {
            return Err(ShroudError::Vault(format!(
                "invalid key size: expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Read key material the vault published in `SHROUD_MASTER_KEY`.
    pub fn from_vault_env() -> Result<Self> {
        let material = env::var(VAULT_KEY_ENV).map_err(|_| {
            ShroudError::Vault(format!(
                "{} not set; the credentials vault must supply a 32-byte hex key",
                VAULT_KEY_ENV
            ))
        })?;
        Self::from_hex(&material)
    }

    /// Encrypt `plaintext`; the random nonce is prepended to the ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| ShroudError::Vault("encryption failed".into()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by [`MasterKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE {
            return Err(ShroudError::Vault(
                "sealed blob too short to contain nonce".into(),
            ));
        }

        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ShroudError::Vault("decryption failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_key() -> MasterKey {
        let mut rng = rand::rng();
        let mut key = [0u8; KEY_SIZE];
        rng.fill(&mut key[..]);
        MasterKey::from_bytes(key)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = random_key();
        let plaintext = b"Hello, World!";

        let sealed = key.seal(plaintext).unwrap();
        let opened = key.open(&sealed).unwrap();
        assert_eq!(plaintext, &opened[..]);
    }

    #[test]
    fn test_invalid_key_material() {
        assert!(MasterKey::from_hex("deadbeef").is_err());
        assert!(MasterKey::from_hex("not hex at all").is_err());
    }

    #[test]
    fn test_corrupted_ciphertext() {
        let key = random_key();
        let mut sealed = key.seal(b"test data").unwrap();
        sealed[NONCE_SIZE + 5] ^= 0xFF;
        assert!(key.open(&sealed).is_err());
    }

    #[test]
    fn test_truncated_blob() {
        let key = random_key();
        assert!(key.open(&[0u8; 4]).is_err());
    }
}
