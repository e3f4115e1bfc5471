use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;
use zeroize::Zeroizing;

/// Environment variable holding the master secret.
pub const MASTER_SECRET_ENV: &str = "KEYFOLIO_MASTER_SECRET";

/// Complete keyfolio configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeyfolioConfig {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Token vault configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Path of the durable token table snapshot
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Wipe the table and snapshot on startup (systemic-corruption remedy)
    #[serde(default)]
    pub clear_on_startup: bool,
    /// PBKDF2 iteration count; lower only for tests
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("keyfolio-tokens.json")
}

fn default_kdf_iterations() -> u32 {
    crate::crypto::DEFAULT_KDF_ITERATIONS
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            clear_on_startup: false,
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

/// Provider probe configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Per-attempt timeout for a provider probe call (seconds)
    #[serde(default = "default_probe_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Additional attempts after a network error or timeout
    #[serde(default = "default_probe_max_retries")]
    pub max_retries: u32,
}

fn default_probe_timeout_seconds() -> u64 {
    10
}

fn default_probe_max_retries() -> u32 {
    2
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_probe_timeout_seconds(),
            max_retries: default_probe_max_retries(),
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed attempts per identifier per window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Window length (seconds)
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_window_seconds() -> u64 {
    900
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_seconds: default_window_seconds(),
        }
    }
}

/// Recovery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Permit the global corrupted-token reset (keep off in production)
    #[serde(default)]
    pub allow_global_reset: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            allow_global_reset: false,
        }
    }
}

impl Default for KeyfolioConfig {
    fn default() -> Self {
        Self {
            vault: VaultConfig::default(),
            probe: ProbeConfig::default(),
            rate_limit: RateLimitConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<KeyfolioConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: KeyfolioConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Process-wide root key material for the cipher engine.
///
/// Zeroized on drop; never printed by `Debug`.
pub struct MasterSecret(Zeroizing<String>);

impl MasterSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Loads the master secret from `KEYFOLIO_MASTER_SECRET`.
    ///
    /// When the variable is absent or empty, a process-lifetime random
    /// secret is generated instead. Tokens encrypted under an ephemeral
    /// secret are UNRECOVERABLE after a restart — acceptable for local
    /// development, never for production.
    pub fn load_or_ephemeral() -> Self {
        match std::env::var(MASTER_SECRET_ENV) {
            Ok(secret) if !secret.is_empty() => Self::new(secret),
            _ => {
                warn!(
                    "{} is not set; using an ephemeral master secret — tokens stored now \
                     become unrecoverable after restart",
                    MASTER_SECRET_ENV
                );
                Self::new(generate_ephemeral_secret())
            }
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(***)")
    }
}

fn generate_ephemeral_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}
