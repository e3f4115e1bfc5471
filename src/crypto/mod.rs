//! Credential encryption for the token vault.
//!
//! Two pieces, used together by the store for every secret:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Cipher Engine                      │
//! │  - PBKDF2-HMAC-SHA256 key derivation     │
//! │  - AES-256-GCM seal/open                 │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!     (fresh salt+nonce)   (stored salt+nonce)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Envelope Codec                     │
//! │  - {salt, nonce, ciphertext} → string    │
//! │  - strict 3-segment parse                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - A fresh key is derived per encryption call (master secret + random salt)
//! - Nonces are random per call and never reused
//! - Authenticated encryption: any tampering fails decryption deterministically
//! - The master secret lives in memory only and is zeroized on drop

mod cipher;
mod envelope;

pub use cipher::{CipherEngine, CorruptionError, DEFAULT_KDF_ITERATIONS};
pub use envelope::{Envelope, FormatError, NONCE_SIZE, SALT_SIZE};
