//! Passphrase sealing for the on-device store and backups.
//!
//! A sealed blob is `salt || nonce || ciphertext`. The plaintext carries a
//! short marker so a wrong passphrase surfaces as [`CryptoError::Decryption`]
//! instead of garbage JSON.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = SALT_LEN + NONCE_LEN;
// Argon2id, 64 MiB, 3 passes, one lane
const KDF_MEMORY_KIB: u32 = 65536;
const KDF_ITERATIONS: u32 = 3;
const KDF_LANES: u32 = 1;
const MARKER: &[u8] = b"FLOWCAST_V1";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed: wrong passphrase or corrupted data")]
    Decryption,
    #[error("sealed payload is truncated")]
    InvalidFormat,
}

/// AES-256-GCM key derived from a passphrase and bound to one salt.
///
/// Derivation dominates the cost of sealing, so long-lived owners such as
/// [`FileStore`](crate::storage::FileStore) derive once and then only draw
/// a fresh nonce per [`seal`](Self::seal).
pub struct SealingKey {
    salt: [u8; SALT_LEN],
    cipher: Aes256Gcm,
}

impl SealingKey {
    /// Derive a key under a new random salt.
    pub fn generate(passphrase: &str) -> Result<Self, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::derive(passphrase, salt)
    }

    /// Derive the key a sealed blob was written with, using its stored salt.
    pub fn for_sealed(passphrase: &str, sealed: &[u8]) -> Result<Self, CryptoError> {
        let (salt, _, _) = split_sealed(sealed)?;
        let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| CryptoError::InvalidFormat)?;
        Self::derive(passphrase, salt)
    }

    fn derive(passphrase: &str, salt: [u8; SALT_LEN]) -> Result<Self, CryptoError> {
        let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, KDF_LANES, Some(KEY_LEN))
            .map_err(|_| CryptoError::KeyDerivation)?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key[..])
            .map_err(|_| CryptoError::KeyDerivation)?;

        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::KeyDerivation)?;
        Ok(Self { salt, cipher })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut marked = Zeroizing::new(Vec::with_capacity(MARKER.len() + plaintext.len()));
        marked.extend_from_slice(MARKER);
        marked.extend_from_slice(plaintext);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), marked.as_slice())
            .map_err(|_| CryptoError::Encryption)?;

        let mut sealed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        sealed.extend_from_slice(&self.salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Blobs sealed under another salt never open with this key.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (salt, nonce, ciphertext) = split_sealed(sealed)?;
        if salt != self.salt.as_slice() {
            return Err(CryptoError::Decryption);
        }

        let opened = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::Decryption)?,
        );
        opened
            .strip_prefix(MARKER)
            .map(<[u8]>::to_vec)
            .ok_or(CryptoError::Decryption)
    }
}

fn split_sealed(sealed: &[u8]) -> Result<(&[u8], &[u8], &[u8]), CryptoError> {
    if sealed.len() < HEADER_LEN + MARKER.len() {
        return Err(CryptoError::InvalidFormat);
    }
    let (salt, rest) = sealed.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    Ok((salt, nonce, ciphertext))
}

/// One-shot seal under a fresh salt.
pub fn encrypt(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    SealingKey::generate(passphrase)?.seal(plaintext)
}

pub fn decrypt(passphrase: &str, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    SealingKey::for_sealed(passphrase, sealed)?.open(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_payload_opens_with_same_passphrase() {
        let sealed = encrypt("test-passphrase-123", b"{\"records\":[]}").unwrap();
        assert_eq!(sealed.len(), HEADER_LEN + MARKER.len() + 14 + 16);

        let opened = decrypt("test-passphrase-123", &sealed).unwrap();
        assert_eq!(opened, b"{\"records\":[]}");
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealed = encrypt("correct", b"secret data").unwrap();
        assert!(matches!(
            decrypt("wrong", &sealed),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn truncated_payload_fails() {
        assert!(matches!(
            decrypt("any", &[0u8; 10]),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn reused_key_keeps_salt_and_varies_nonce() {
        let key = SealingKey::generate("pass").unwrap();
        let first = key.seal(b"one").unwrap();
        let second = key.seal(b"two").unwrap();

        assert_eq!(first[..SALT_LEN], second[..SALT_LEN]);
        assert_ne!(first[SALT_LEN..HEADER_LEN], second[SALT_LEN..HEADER_LEN]);
        assert_eq!(key.open(&second).unwrap(), b"two");
        assert_eq!(decrypt("pass", &first).unwrap(), b"one");

        let foreign = encrypt("pass", b"three").unwrap();
        assert!(matches!(key.open(&foreign), Err(CryptoError::Decryption)));
    }
}
