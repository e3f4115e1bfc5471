//! AES-256-GCM encryption with per-call key derivation.
//!
//! Every encryption call derives a fresh key with PBKDF2-HMAC-SHA256 over the
//! master secret and a random 16-byte salt, then seals the plaintext under a
//! random 96-bit nonce. Salt and nonce travel with the ciphertext in the
//! [`Envelope`]; the master secret never leaves the engine.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use super::envelope::{Envelope, FormatError, NONCE_SIZE, SALT_SIZE};

/// Size of the derived encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count (OWASP recommendation).
///
/// Deliberately slow. Tests and latency-sensitive deployments can lower it
/// through `vault.kdf_iterations` in the configuration.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Decryption failed: malformed envelope, wrong key material, or tampered
/// ciphertext. Never returns garbage silently — GCM authentication makes
/// tamper detection deterministic.
#[derive(Error, Debug)]
pub enum CorruptionError {
    #[error("malformed envelope: {0}")]
    Format(#[from] FormatError),

    #[error("decryption failed (wrong key material or tampered ciphertext)")]
    Cipher,

    #[error("decrypted bytes are not valid UTF-8")]
    Utf8,
}

/// Derives per-call keys from a master secret and encrypts/decrypts single
/// secret strings.
///
/// Construct one engine per process (or per test, with a distinct master
/// secret) and share it; both operations are pure and side-effect-free.
pub struct CipherEngine {
    master_secret: Zeroizing<String>,
    iterations: u32,
}

impl CipherEngine {
    pub fn new(master_secret: &str) -> Self {
        Self::with_iterations(master_secret, DEFAULT_KDF_ITERATIONS)
    }

    /// Engine with an explicit KDF cost. Low values are for tests only.
    pub fn with_iterations(master_secret: &str, iterations: u32) -> Self {
        Self {
            master_secret: Zeroizing::new(master_secret.to_string()),
            iterations,
        }
    }

    fn derive_key(&self, salt: &[u8; SALT_SIZE]) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(
            self.master_secret.as_bytes(),
            salt,
            self.iterations,
            key.as_mut(),
        );
        key
    }

    /// Encrypts a plaintext secret under a freshly derived key.
    ///
    /// Salt and nonce are random per call, so encrypting the same plaintext
    /// twice produces two different envelopes.
    pub fn encrypt(&self, plaintext: &str) -> Result<Envelope> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(Envelope {
            salt,
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Decrypts an envelope by re-deriving the key from its stored salt.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<String, CorruptionError> {
        let key = self.derive_key(&envelope.salt);
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| CorruptionError::Cipher)?;

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                envelope.ciphertext.as_ref(),
            )
            .map_err(|_| CorruptionError::Cipher)?;

        String::from_utf8(plaintext).map_err(|_| CorruptionError::Utf8)
    }

    /// Decodes and decrypts an envelope string in one step.
    pub fn decrypt_str(&self, encoded: &str) -> Result<String, CorruptionError> {
        let envelope = Envelope::decode(encoded)?;
        self.decrypt(&envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low KDF cost for fast tests
    fn test_engine(master_secret: &str) -> CipherEngine {
        CipherEngine::with_iterations(master_secret, 32)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let engine = test_engine("test-master-secret");
        let plaintext = "my-secret-access-token-12345";

        let envelope = engine.encrypt(plaintext).expect("Encryption failed");
        let decrypted = engine.decrypt(&envelope).expect("Decryption failed");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_roundtrip_unicode_and_edge_lengths() {
        let engine = test_engine("test-master-secret");

        for plaintext in ["a", "ключ-доступу-🔑", "line1\nline2\ttab", &"x".repeat(500)] {
            let envelope = engine.encrypt(plaintext).unwrap();
            assert_eq!(engine.decrypt(&envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_same_plaintext_different_envelopes() {
        let engine = test_engine("test-master-secret");
        let plaintext = "same-plaintext";

        let first = engine.encrypt(plaintext).unwrap();
        let second = engine.encrypt(plaintext).unwrap();

        // Fresh salt and nonce per call
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.encode(), second.encode());

        assert_eq!(engine.decrypt(&first).unwrap(), plaintext);
        assert_eq!(engine.decrypt(&second).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_master_secret_fails() {
        let engine = test_engine("master-secret-one");
        let other = test_engine("master-secret-two");

        let envelope = engine.encrypt("secret").unwrap();

        assert!(matches!(
            other.decrypt(&envelope),
            Err(CorruptionError::Cipher)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let engine = test_engine("test-master-secret");
        let mut envelope = engine.encrypt("secret").unwrap();

        // Single-bit flip must be detected, not decrypted to garbage
        envelope.ciphertext[0] ^= 0x01;

        assert!(matches!(
            engine.decrypt(&envelope),
            Err(CorruptionError::Cipher)
        ));
    }

    #[test]
    fn test_tampered_envelope_string_fails() {
        let engine = test_engine("test-master-secret");
        let encoded = engine.encrypt("secret").unwrap().encode();

        // Altering one character breaks either the encoding or the auth tag
        let mut chars: Vec<char> = encoded.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        let corrupted: String = chars.into_iter().collect();

        assert!(engine.decrypt_str(&corrupted).is_err());
    }

    #[test]
    fn test_malformed_string_is_format_error() {
        let engine = test_engine("test-master-secret");
        let result = engine.decrypt_str("@@@not-an-envelope@@@");
        assert!(matches!(result, Err(CorruptionError::Format(_))));
    }

    #[test]
    fn test_iteration_count_is_part_of_key() {
        let fast = CipherEngine::with_iterations("same-secret", 32);
        let slow = CipherEngine::with_iterations("same-secret", 64);

        let envelope = fast.encrypt("secret").unwrap();
        assert!(slow.decrypt(&envelope).is_err());
    }
}
