//! Transportable text format for encrypted secrets.
//!
//! An envelope packs `{salt, nonce, ciphertext}` into a single string:
//! each part is hex-encoded, the parts are joined with `:`, and the joined
//! string is base64-encoded. The result is plain ASCII, safe to store in
//! JSON and to back up independently of the master secret.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

/// Size of the KDF salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of the AES-GCM nonce in bytes (96 bits, standard for GCM)
pub const NONCE_SIZE: usize = 12;

/// Separator between the hex-encoded envelope segments
const DELIMITER: char = ':';

/// Malformed envelope: wrong segment count or bad encoding.
///
/// Always locally recoverable — the caller treats the record as corrupted.
#[derive(Error, Debug, PartialEq)]
pub enum FormatError {
    #[error("envelope is not valid base64: {0}")]
    Base64(String),

    #[error("envelope payload is not valid UTF-8")]
    Payload,

    #[error("expected 3 envelope segments, got {0}")]
    SegmentCount(usize),

    #[error("invalid hex in {field} segment")]
    Hex { field: &'static str },

    #[error("invalid salt length: expected {expected}, got {got}")]
    SaltLength { expected: usize, got: usize },

    #[error("invalid nonce length: expected {expected}, got {got}")]
    NonceLength { expected: usize, got: usize },
}

/// One encrypted secret: the KDF salt, the cipher nonce, and the ciphertext
/// (which includes the GCM authentication tag).
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Serializes the envelope to its transportable string form.
    pub fn encode(&self) -> String {
        let joined = format!(
            "{}{}{}{}{}",
            hex::encode(self.salt),
            DELIMITER,
            hex::encode(self.nonce),
            DELIMITER,
            hex::encode(&self.ciphertext),
        );
        BASE64.encode(joined.as_bytes())
    }

    /// Parses an envelope string produced by [`Envelope::encode`].
    ///
    /// The input must decode to exactly three hex segments; anything else
    /// fails with a [`FormatError`] naming the first offending part.
    pub fn decode(encoded: &str) -> Result<Self, FormatError> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| FormatError::Base64(e.to_string()))?;
        let joined = String::from_utf8(raw).map_err(|_| FormatError::Payload)?;

        let segments: Vec<&str> = joined.split(DELIMITER).collect();
        if segments.len() != 3 {
            return Err(FormatError::SegmentCount(segments.len()));
        }

        let salt_bytes = hex::decode(segments[0]).map_err(|_| FormatError::Hex { field: "salt" })?;
        let nonce_bytes =
            hex::decode(segments[1]).map_err(|_| FormatError::Hex { field: "nonce" })?;
        let ciphertext =
            hex::decode(segments[2]).map_err(|_| FormatError::Hex { field: "ciphertext" })?;

        let salt: [u8; SALT_SIZE] = salt_bytes.try_into().map_err(|v: Vec<u8>| {
            FormatError::SaltLength {
                expected: SALT_SIZE,
                got: v.len(),
            }
        })?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.try_into().map_err(|v: Vec<u8>| {
            FormatError::NonceLength {
                expected: NONCE_SIZE,
                got: v.len(),
            }
        })?;

        Ok(Self {
            salt,
            nonce,
            ciphertext,
        })
    }
}
