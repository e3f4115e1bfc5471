//! Service facade over the vault, validity dispatcher and rate limiter.
//!
//! The route layer constructs one [`CredentialService`] at startup (injected
//! configuration and master secret, registered provider probes) and calls it
//! for everything credential-related. Callers are trusted to have
//! authenticated the user already.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::{KeyfolioConfig, MasterSecret, RateLimitConfig, RecoveryConfig};
use crate::rate_limit::RateLimiter;
use crate::store::{StoreError, TokenMetadata, TokenVault};
use crate::validity::{Provider, ProviderProbe, ValidityDispatcher, ValidityReport};

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Provider rejected the secret; nothing was stored.
    #[error("provider rejected the secret: {0}")]
    Validation(String),

    #[error("global corrupted-token reset is disabled by configuration")]
    RecoveryDisabled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One service instance per process, shared by the route layer.
pub struct CredentialService {
    vault: TokenVault,
    dispatcher: ValidityDispatcher,
    rate_limiter: RateLimiter,
    rate_limit: RateLimitConfig,
    recovery: RecoveryConfig,
}

impl CredentialService {
    /// Opens the vault and wires the dispatcher with the given probes.
    pub fn open(
        config: &KeyfolioConfig,
        master_secret: &MasterSecret,
        probes: Vec<Arc<dyn ProviderProbe>>,
    ) -> anyhow::Result<Self> {
        let vault = TokenVault::open(&config.vault, master_secret)?;

        let mut dispatcher = ValidityDispatcher::new(
            Duration::from_secs(config.probe.timeout_seconds),
            config.probe.max_retries,
        );
        for probe in probes {
            dispatcher.register(probe);
        }

        Ok(Self {
            vault,
            dispatcher,
            rate_limiter: RateLimiter::new(),
            rate_limit: config.rate_limit.clone(),
            recovery: config.recovery.clone(),
        })
    }

    /// Validates a secret with the provider, then stores it.
    ///
    /// The secret is never stored when validation fails; the provider's
    /// message is reported verbatim in [`ServiceError::Validation`].
    pub async fn connect_provider(
        &self,
        user_id: &str,
        provider: Provider,
        raw_secret: &str,
        display_name: Option<&str>,
    ) -> Result<TokenMetadata, ServiceError> {
        let report = self.dispatcher.test_token_validity(provider, raw_secret).await;
        if !report.valid {
            return Err(ServiceError::Validation(
                report.error.unwrap_or_else(|| "secret rejected".to_string()),
            ));
        }

        info!(user_id, provider = %provider, "Secret validated, storing token");
        Ok(self
            .vault
            .set_token(user_id, provider, raw_secret, display_name)?)
    }

    /// Stores a secret without a provider round-trip (import paths, tests).
    pub fn set_token(
        &self,
        user_id: &str,
        provider: Provider,
        raw_secret: &str,
        display_name: Option<&str>,
    ) -> Result<TokenMetadata, ServiceError> {
        Ok(self
            .vault
            .set_token(user_id, provider, raw_secret, display_name)?)
    }

    pub fn get_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<String>, ServiceError> {
        Ok(self.vault.get_token(user_id, provider)?)
    }

    pub fn list_tokens(&self, user_id: &str) -> Vec<TokenMetadata> {
        self.vault.list_tokens(user_id)
    }

    pub fn delete_token(&self, user_id: &str, provider: Provider) -> Result<bool, ServiceError> {
        Ok(self.vault.delete_token(user_id, provider)?)
    }

    pub fn clear_all_for_user(&self, user_id: &str) -> Result<usize, ServiceError> {
        Ok(self.vault.clear_all_for_user(user_id)?)
    }

    pub fn cleanup_corrupted_tokens(&self, user_id: &str) -> Result<usize, ServiceError> {
        Ok(self.vault.cleanup_corrupted_tokens(user_id)?)
    }

    /// Global inactive-token sweep, gated by `recovery.allow_global_reset`.
    pub fn reset_all_corrupted_tokens(&self) -> Result<usize, ServiceError> {
        if !self.recovery.allow_global_reset {
            return Err(ServiceError::RecoveryDisabled);
        }
        Ok(self.vault.reset_all_corrupted_tokens()?)
    }

    /// Validity check without storing anything.
    pub async fn test_token_validity(
        &self,
        provider: Provider,
        raw_secret: &str,
    ) -> ValidityReport {
        self.dispatcher.test_token_validity(provider, raw_secret).await
    }

    /// Rate-limit check with the configured window. Callers must surface a
    /// denial to the user, never swallow it.
    pub fn check_limit(&self, identifier: &str) -> bool {
        self.rate_limiter.check_limit(
            identifier,
            self.rate_limit.max_attempts,
            Duration::from_secs(self.rate_limit.window_seconds),
        )
    }

    /// Clears the rate-limit window after a successful sensitive operation.
    pub fn reset_limit(&self, identifier: &str) {
        self.rate_limiter.reset(identifier);
    }
}
