//! Token vault: the per-user, per-provider credential table.
//!
//! All mutations serialize through one table mutex and write the snapshot
//! through while the lock is held, so two concurrent `set_token` calls for
//! the same `(user, provider)` cannot interleave into two active records or
//! a lost write. The deliberately slow KDF work runs outside the lock.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::snapshot::TableSnapshot;
use super::{StoreError, StoredToken, TokenMetadata, TokenState};
use crate::config::{MasterSecret, VaultConfig};
use crate::crypto::CipherEngine;
use crate::validity::Provider;

type TokenTable = HashMap<String, Vec<StoredToken>>;

/// Encrypted credential table with write-through snapshot persistence.
///
/// Construct once with injected configuration and pass through the call
/// graph; distinct master secrets per instance make isolated tests cheap.
pub struct TokenVault {
    cipher: CipherEngine,
    table: Mutex<TokenTable>,
    snapshot_path: PathBuf,
}

impl TokenVault {
    /// Opens the vault, loading an existing snapshot if one is present.
    ///
    /// A missing or corrupt snapshot starts the vault empty. When
    /// `clear_on_startup` is set, both the in-memory table and the durable
    /// snapshot are wiped first — the remedy for systemic corruption after a
    /// master-secret rotation.
    pub fn open(config: &VaultConfig, master_secret: &MasterSecret) -> Result<Self> {
        let cipher = CipherEngine::with_iterations(master_secret.expose(), config.kdf_iterations);

        let table = if config.clear_on_startup {
            if config.snapshot_path.exists() {
                fs::remove_file(&config.snapshot_path)
                    .context("Failed to remove token snapshot during startup wipe")?;
            }
            warn!(
                path = %config.snapshot_path.display(),
                "Startup token wipe enabled: all stored credentials were removed"
            );
            TokenTable::new()
        } else {
            TableSnapshot::load_or_empty(&config.snapshot_path)
        };

        info!(
            users = table.len(),
            path = %config.snapshot_path.display(),
            "Token vault opened"
        );

        Ok(Self {
            cipher,
            table: Mutex::new(table),
            snapshot_path: config.snapshot_path.clone(),
        })
    }

    /// Stores a new credential for `(user_id, provider)`.
    ///
    /// Any previously active record for the pair is revoked, so exactly one
    /// active record exists for the pair when this returns. There is no
    /// update-in-place: replacing a credential always appends a new record.
    pub fn set_token(
        &self,
        user_id: &str,
        provider: Provider,
        raw_secret: &str,
        display_name: Option<&str>,
    ) -> Result<TokenMetadata, StoreError> {
        // KDF is deliberately slow; run it before taking the table lock.
        let envelope = self.cipher.encrypt(raw_secret).map_err(StoreError::Encrypt)?;

        let record = StoredToken {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            provider,
            envelope: envelope.encode(),
            display_name: display_name.map(|s| s.to_string()),
            state: TokenState::Active,
            created_at: Utc::now(),
            last_used_at: None,
        };
        let metadata = record.metadata();

        let mut table = self.table.lock().unwrap();
        let tokens = table.entry(user_id.to_string()).or_default();
        for existing in tokens
            .iter_mut()
            .filter(|t| t.provider == provider)
        {
            existing.revoke();
        }
        tokens.push(record);

        info!(user_id, provider = %provider, "Stored new active token");
        self.persist(&table)?;

        Ok(metadata)
    }

    /// Decrypts and returns the active secret for `(user_id, provider)`.
    ///
    /// Returns `None` when no active record exists. A record that fails to
    /// decrypt is quarantined and also reported as `None` — the original
    /// secret is gone, so the caller must prompt the user to reconnect.
    pub fn get_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<String>, StoreError> {
        // Clone the envelope out and decrypt without holding the lock; the
        // record is re-located by id afterwards in case it changed meanwhile.
        let (record_id, envelope) = {
            let table = self.table.lock().unwrap();
            let active = table
                .get(user_id)
                .and_then(|tokens| tokens.iter().find(|t| t.provider == provider && t.is_active()));
            match active {
                Some(t) => (t.id, t.envelope.clone()),
                None => return Ok(None),
            }
        };

        match self.cipher.decrypt_str(&envelope) {
            Ok(plaintext) => {
                let mut table = self.table.lock().unwrap();
                let touched = match find_record(&mut table, user_id, record_id) {
                    Some(record) => {
                        record.last_used_at = Some(Utc::now());
                        true
                    }
                    None => false,
                };
                if touched {
                    self.persist(&table)?;
                }
                Ok(Some(plaintext))
            }
            Err(e) => {
                warn!(
                    user_id,
                    provider = %provider,
                    error = %e,
                    "Stored token failed to decrypt, quarantining record"
                );
                let mut table = self.table.lock().unwrap();
                let touched = match find_record(&mut table, user_id, record_id) {
                    Some(record) => {
                        record.quarantine();
                        true
                    }
                    None => false,
                };
                if touched {
                    self.persist(&table)?;
                }
                Ok(None)
            }
        }
    }

    /// Lists active tokens for a user. Metadata only — no envelopes.
    pub fn list_tokens(&self, user_id: &str) -> Vec<TokenMetadata> {
        let table = self.table.lock().unwrap();
        table
            .get(user_id)
            .map(|tokens| {
                tokens
                    .iter()
                    .filter(|t| t.is_active())
                    .map(StoredToken::metadata)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Revokes the active record for `(user_id, provider)`.
    ///
    /// Soft delete: the record stays in the table until a cleanup operation
    /// removes it. Returns whether an active record existed.
    pub fn delete_token(&self, user_id: &str, provider: Provider) -> Result<bool, StoreError> {
        let mut table = self.table.lock().unwrap();
        let mut revoked = false;
        if let Some(tokens) = table.get_mut(user_id) {
            for token in tokens
                .iter_mut()
                .filter(|t| t.provider == provider && t.is_active())
            {
                token.revoke();
                revoked = true;
            }
        }
        if revoked {
            info!(user_id, provider = %provider, "Revoked active token");
            self.persist(&table)?;
        }
        Ok(revoked)
    }

    /// Hard-removes every record for a user, active or not.
    ///
    /// Emergency recovery operation; returns the number of records removed.
    pub fn clear_all_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut table = self.table.lock().unwrap();
        let removed = table.remove(user_id).map(|tokens| tokens.len()).unwrap_or(0);
        if removed > 0 {
            info!(user_id, removed, "Cleared all tokens for user");
            self.persist(&table)?;
        }
        Ok(removed)
    }

    /// Hard-removes all inactive (revoked and quarantined) records for a
    /// user. Returns the number removed.
    pub fn cleanup_corrupted_tokens(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut table = self.table.lock().unwrap();
        let mut removed = 0;
        if let Some(tokens) = table.get_mut(user_id) {
            let before = tokens.len();
            tokens.retain(|t| t.is_active());
            removed = before - tokens.len();
        }
        if table.get(user_id).map_or(false, |tokens| tokens.is_empty()) {
            table.remove(user_id);
        }
        if removed > 0 {
            info!(user_id, removed, "Removed inactive tokens for user");
            self.persist(&table)?;
        }
        Ok(removed)
    }

    /// [`Self::cleanup_corrupted_tokens`] across every known user.
    ///
    /// Administrative operation; the service layer gates it to
    /// non-production configuration.
    pub fn reset_all_corrupted_tokens(&self) -> Result<usize, StoreError> {
        let mut table = self.table.lock().unwrap();
        let mut removed = 0;
        for tokens in table.values_mut() {
            let before = tokens.len();
            tokens.retain(|t| t.is_active());
            removed += before - tokens.len();
        }
        table.retain(|_, tokens| !tokens.is_empty());
        if removed > 0 {
            warn!(removed, "Removed inactive tokens across all users");
            self.persist(&table)?;
        }
        Ok(removed)
    }

    /// Write-through snapshot. Called with the table lock held, which
    /// serializes durable writes with the mutation that caused them.
    fn persist(&self, table: &TokenTable) -> Result<(), StoreError> {
        let snapshot = TableSnapshot::new(table.clone());
        if let Err(e) = snapshot.save_to_file(&self.snapshot_path) {
            // In-memory state keeps the mutation; the caller sees the failure.
            error!(
                error = %e,
                path = %self.snapshot_path.display(),
                "Failed to persist token table"
            );
            return Err(StoreError::Persistence(e));
        }
        Ok(())
    }
}

fn find_record<'a>(
    table: &'a mut TokenTable,
    user_id: &str,
    id: Uuid,
) -> Option<&'a mut StoredToken> {
    table.get_mut(user_id)?.iter_mut().find(|t| t.id == id)
}
