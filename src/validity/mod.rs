//! Provider validity checks.
//!
//! Providers (bank, exchange, market data) validate secrets over the network.
//! Their clients live in the application layer and plug in through the
//! [`ProviderProbe`] trait; the [`ValidityDispatcher`] wraps every call in a
//! timeout and a bounded retry budget and normalizes the heterogeneous
//! failure shapes into one [`ValidityReport`], so callers never see a raw
//! provider error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

/// External credential-accepting service a user can connect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Bank account API (personal token)
    Monobank,
    /// Exchange API (key/secret pair, passed as one joined secret)
    Binance,
    /// Market data API (API key)
    AlphaVantage,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Monobank => "monobank",
            Provider::Binance => "binance",
            Provider::AlphaVantage => "alpha_vantage",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("unknown provider: {0}")]
pub struct UnknownProviderError(pub String);

impl FromStr for Provider {
    type Err = UnknownProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monobank" => Ok(Provider::Monobank),
            "binance" => Ok(Provider::Binance),
            "alpha_vantage" => Ok(Provider::AlphaVantage),
            other => Err(UnknownProviderError(other.to_string())),
        }
    }
}

/// Failure shapes a provider client may report.
///
/// Probe implementations map HTTP statuses, transport errors and
/// provider-specific messages onto these variants; the dispatcher decides
/// which ones are worth retrying.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("provider rejected the credential: {0}")]
    Unauthorized(String),

    #[error("provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected provider failure: {0}")]
    Unexpected(String),
}

/// Probe interface implemented by the provider clients (application layer).
///
/// Implementations are stateless; credentials to check are passed per call.
#[async_trait]
pub trait ProviderProbe: Send + Sync {
    /// The provider this probe talks to.
    fn provider(&self) -> Provider;

    /// Check that `raw_secret` is accepted by the provider.
    async fn validate(&self, raw_secret: &str) -> Result<(), ProbeError>;

    /// Check that the provider endpoint is reachable at all.
    async fn probe(&self) -> Result<(), ProbeError>;
}

/// Uniform result of a validity check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidityReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidityReport {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn rejected(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Routes validity checks to the registered probe for a provider.
///
/// Every attempt runs under `attempt_timeout`; network errors and timeouts
/// are retried up to `max_retries` additional attempts. All failure shapes —
/// including a missing probe registration — come back as a rejected
/// [`ValidityReport`], never as an error the caller has to unpack.
pub struct ValidityDispatcher {
    probes: HashMap<Provider, Arc<dyn ProviderProbe>>,
    attempt_timeout: Duration,
    max_retries: u32,
}

impl ValidityDispatcher {
    pub fn new(attempt_timeout: Duration, max_retries: u32) -> Self {
        Self {
            probes: HashMap::new(),
            attempt_timeout,
            max_retries,
        }
    }

    /// Register a probe under its provider. Replaces any previous probe for
    /// the same provider.
    pub fn register(&mut self, probe: Arc<dyn ProviderProbe>) {
        self.probes.insert(probe.provider(), probe);
    }

    /// Check whether `raw_secret` is accepted by `provider`.
    pub async fn test_token_validity(&self, provider: Provider, raw_secret: &str) -> ValidityReport {
        let Some(probe) = self.probes.get(&provider) else {
            return ValidityReport::rejected(format!("no probe registered for provider {provider}"));
        };
        self.run_with_budget(provider, || probe.validate(raw_secret))
            .await
    }

    /// Check whether `provider` is reachable, independent of any credential.
    pub async fn probe_provider(&self, provider: Provider) -> ValidityReport {
        let Some(probe) = self.probes.get(&provider) else {
            return ValidityReport::rejected(format!("no probe registered for provider {provider}"));
        };
        self.run_with_budget(provider, || probe.probe()).await
    }

    async fn run_with_budget<F, Fut>(&self, provider: Provider, call: F) -> ValidityReport
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), ProbeError>>,
    {
        let mut attempt = 0u32;
        loop {
            match timeout(self.attempt_timeout, call()).await {
                Ok(Ok(())) => return ValidityReport::ok(),
                Ok(Err(ProbeError::Network(message))) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(provider = %provider, attempt, error = %message, "Probe network error, retrying");
                }
                Ok(Err(e)) => return ValidityReport::rejected(e.to_string()),
                Err(_) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(provider = %provider, attempt, "Probe timed out, retrying");
                }
                Err(_) => {
                    return ValidityReport::rejected(format!(
                        "provider {provider} did not respond within {}s",
                        self.attempt_timeout.as_secs_f64()
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_string_forms() {
        assert_eq!(Provider::Monobank.as_str(), "monobank");
        assert_eq!(Provider::Binance.as_str(), "binance");
        assert_eq!(Provider::AlphaVantage.as_str(), "alpha_vantage");

        for provider in [Provider::Monobank, Provider::Binance, Provider::AlphaVantage] {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert!("coinbase".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_serde_matches_as_str() {
        let json = serde_json::to_string(&Provider::AlphaVantage).unwrap();
        assert_eq!(json, "\"alpha_vantage\"");
        let back: Provider = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Provider::AlphaVantage);
    }

    #[test]
    fn test_report_serialization_skips_empty_error() {
        let ok = ValidityReport::ok();
        assert_eq!(serde_json::to_string(&ok).unwrap(), "{\"valid\":true}");

        let rejected = ValidityReport::rejected("bad key");
        assert_eq!(
            serde_json::to_string(&rejected).unwrap(),
            "{\"valid\":false,\"error\":\"bad key\"}"
        );
    }
}
