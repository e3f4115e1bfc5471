//! Encrypted token storage for provider credentials.
//!
//! Per-user, per-provider credential table with transparent encryption.
//! Secrets are encrypted by the [`crate::crypto`] engine before they reach
//! the table and exist in plaintext only transiently inside cipher calls.
//!
//! # Token lifecycle
//!
//! ```text
//!              set_token
//!                  │
//!                  ▼
//!              ┌────────┐  delete_token / replaced   ┌─────────┐
//!              │ Active │ ─────────────────────────▶ │ Revoked │
//!              └────────┘                            └─────────┘
//!                  │                                      │
//!                  │ get_token decrypt failure            │ cleanup /
//!                  ▼                                      ▼ clear
//!            ┌─────────────┐   cleanup / clear      (removed from
//!            │ Quarantined │ ─────────────────────▶  the table)
//!            └─────────────┘
//! ```
//!
//! `Active` is the only state from which `get_token` returns a secret.
//! Inactive records stay in the table for audit until an explicit cleanup
//! or clear operation hard-removes them.
//!
//! # Persistence
//!
//! The whole table is re-serialized to a JSON snapshot after every mutation
//! (write-through). On startup an existing snapshot is loaded; a missing or
//! corrupt snapshot means "start empty", never a failed start.

use anyhow::Error as AnyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::validity::Provider;

mod snapshot;
mod vault;

pub use snapshot::TableSnapshot;
pub use vault::TokenVault;

/// Store operation failures unrelated to credential validity.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to encrypt secret for storage")]
    Encrypt(#[source] AnyError),

    /// The in-memory mutation stays applied; only the durable write failed.
    #[error("failed to persist token table")]
    Persistence(#[source] AnyError),
}

/// Lifecycle state of a stored token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Active,
    /// Deactivated by an explicit user delete (or replaced by a newer token).
    Revoked,
    /// Deactivated after a failed decrypt; kept for audit until cleanup.
    Quarantined,
}

impl TokenState {
    pub fn is_active(&self) -> bool {
        matches!(self, TokenState::Active)
    }
}

/// One stored credential record.
///
/// Owned exclusively by the [`TokenVault`]; `envelope` is the only
/// secret-bearing field and is safe to inspect or back up independently of
/// the master secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredToken {
    pub id: Uuid,
    pub user_id: String,
    pub provider: Provider,
    /// Encrypted envelope string (see [`crate::crypto::Envelope`])
    pub envelope: String,
    pub display_name: Option<String>,
    pub state: TokenState,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Active → Revoked. No-op for records already inactive.
    fn revoke(&mut self) {
        if self.state == TokenState::Active {
            self.state = TokenState::Revoked;
        }
    }

    /// Active → Quarantined. No-op for records already inactive.
    fn quarantine(&mut self) {
        if self.state == TokenState::Active {
            self.state = TokenState::Quarantined;
        }
    }

    fn metadata(&self) -> TokenMetadata {
        TokenMetadata {
            id: self.id,
            provider: self.provider,
            token_name: self.display_name.clone(),
            is_active: self.is_active(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// Listing view of a stored token. Never carries the envelope or plaintext.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TokenMetadata {
    pub id: Uuid,
    pub provider: Provider,
    #[serde(rename = "tokenName")]
    pub token_name: Option<String>,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastUsedAt")]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token(state: TokenState) -> StoredToken {
        StoredToken {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            provider: Provider::Binance,
            envelope: "opaque".to_string(),
            display_name: Some("trading key".to_string()),
            state,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_transitions_only_leave_active() {
        let mut token = sample_token(TokenState::Active);
        token.quarantine();
        assert_eq!(token.state, TokenState::Quarantined);

        // Quarantined records are terminal until removed
        token.revoke();
        assert_eq!(token.state, TokenState::Quarantined);

        let mut token = sample_token(TokenState::Active);
        token.revoke();
        assert_eq!(token.state, TokenState::Revoked);
        token.quarantine();
        assert_eq!(token.state, TokenState::Revoked);
    }

    #[test]
    fn test_metadata_has_no_envelope() {
        let token = sample_token(TokenState::Active);
        let metadata = token.metadata();

        assert_eq!(metadata.id, token.id);
        assert_eq!(metadata.provider, Provider::Binance);
        assert_eq!(metadata.token_name.as_deref(), Some("trading key"));
        assert!(metadata.is_active);

        let json = serde_json::to_string(&metadata).unwrap();
        assert!(!json.contains("opaque"));
        assert!(!json.contains("envelope"));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TokenState::Quarantined).unwrap(),
            "\"quarantined\""
        );
    }
}
