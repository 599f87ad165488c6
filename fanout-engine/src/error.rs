//! Error types for the fanout engine.
//!
//! Per-provider problems ([`ProviderError`], [`DenialReason`],
//! [`ExclusionReason`]) are recoverable: they shrink the candidate set for
//! one request. Only [`RoutingFailure`] reaches the caller, and it always
//! carries the per-provider detail needed to diagnose it. No query text or
//! credentials appear in any message.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure reported by a provider transport shim for a single call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ProviderError {
    /// The call did not complete before its timeout or the query deadline.
    #[error("provider timed out")]
    Timeout,

    /// The provider's own API refused the call for quota reasons.
    #[error("rate limited by provider")]
    RateLimitedByProvider,

    /// Credentials were rejected. Needs operator attention.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The provider could not be reached (DNS, connect, reset).
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered with something the shim could not parse.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Configuration problems that retrying will not fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::AuthFailure(_) | Self::Malformed(_))
    }

    /// Transient failures that feed backoff.
    pub fn is_transient(&self) -> bool {
        !self.is_configuration()
    }
}

/// Fixed rate-limit window that was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateTier {
    Minute,
    Hour,
    Day,
}

impl fmt::Display for RateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        })
    }
}

/// Budget ceiling that a call would breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    Query,
    Day,
    Month,
}

impl fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Day => "day",
            Self::Month => "month",
        })
    }
}

/// Why the gatekeeper refused to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    #[error("rate limited ({0} window exhausted)")]
    RateLimited(RateTier),

    #[error("budget exceeded ({0} ceiling)")]
    BudgetExceeded(BudgetTier),

    #[error("concurrency limit reached")]
    ConcurrencyLimited,
}

/// Why a provider was left out of a dispatch without being called.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    #[error("admission denied: {0}")]
    AdmissionDenied(DenialReason),

    #[error("circuit open")]
    CircuitOpen,

    #[error("disabled by operator")]
    Disabled,

    #[error("not registered")]
    NotRegistered,

    /// Eligible, but the query deadline passed before its turn came.
    #[error("deadline reached before call")]
    DeadlineReached,
}

/// A provider that was excluded, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub provider: String,
    pub reason: ExclusionReason,
}

impl Exclusion {
    pub fn new(provider: impl Into<String>, reason: ExclusionReason) -> Self {
        Self {
            provider: provider.into(),
            reason,
        }
    }
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

/// A provider that was called and did not return usable data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Request-level failure returned from [`Router::route`](crate::Router::route).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoutingFailure {
    /// Every candidate was excluded before any call was attempted.
    #[error("no eligible providers: {}", join(.excluded))]
    NoEligibleProviders { excluded: Vec<Exclusion> },

    /// Candidates were called but none returned usable data.
    #[error("all providers failed: {}", join(.failures))]
    AllProvidersFailed {
        failures: Vec<ProviderFailure>,
        excluded: Vec<Exclusion>,
    },

    /// The query cannot be routed as given.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid engine configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl RoutingFailure {
    /// Whether the caller may reasonably retry the same query later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoEligibleProviders { .. } | Self::AllProvidersFailed { .. }
        )
    }

    /// Providers excluded before dispatch, if this failure tracked any.
    pub fn exclusions(&self) -> &[Exclusion] {
        match self {
            Self::NoEligibleProviders { excluded } | Self::AllProvidersFailed { excluded, .. } => {
                excluded
            }
            Self::InvalidQuery(_) | Self::Config(_) => &[],
        }
    }
}

/// Cache-tier failure. Never fatal to a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out")]
    Timeout,

    #[error("cache codec error: {0}")]
    Codec(String),
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, RoutingFailure>;

fn join<T: fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "none".to_owned();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_provider_errors() {
        assert_eq!(ProviderError::Timeout.to_string(), "provider timed out");
        assert_eq!(
            ProviderError::AuthFailure("bad key".into()).to_string(),
            "authentication failed: bad key"
        );
        assert_eq!(
            ProviderError::Unreachable("connection refused".into()).to_string(),
            "provider unreachable: connection refused"
        );
    }

    #[test]
    fn configuration_vs_transient() {
        assert!(ProviderError::AuthFailure(String::new()).is_configuration());
        assert!(ProviderError::Malformed(String::new()).is_configuration());
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Unreachable(String::new()).is_transient());
        assert!(ProviderError::RateLimitedByProvider.is_transient());
    }

    #[test]
    fn display_denials() {
        assert_eq!(
            DenialReason::RateLimited(RateTier::Minute).to_string(),
            "rate limited (minute window exhausted)"
        );
        assert_eq!(
            DenialReason::BudgetExceeded(BudgetTier::Month).to_string(),
            "budget exceeded (month ceiling)"
        );
        assert_eq!(
            ExclusionReason::AdmissionDenied(DenialReason::ConcurrencyLimited).to_string(),
            "admission denied: concurrency limit reached"
        );
    }

    #[test]
    fn no_eligible_lists_every_exclusion() {
        let err = RoutingFailure::NoEligibleProviders {
            excluded: vec![
                Exclusion::new("brave", ExclusionReason::CircuitOpen),
                Exclusion::new(
                    "exa",
                    ExclusionReason::AdmissionDenied(DenialReason::RateLimited(RateTier::Hour)),
                ),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("no eligible providers"));
        assert!(msg.contains("brave: circuit open"));
        assert!(msg.contains("exa: admission denied: rate limited (hour window exhausted)"));
        assert!(err.is_retryable());
        assert_eq!(err.exclusions().len(), 2);
    }

    #[test]
    fn all_failed_lists_failures() {
        let err = RoutingFailure::AllProvidersFailed {
            failures: vec![ProviderFailure {
                provider: "serper".into(),
                error: ProviderError::Timeout,
            }],
            excluded: vec![],
        };
        assert_eq!(
            err.to_string(),
            "all providers failed: serper: provider timed out"
        );
    }

    #[test]
    fn invalid_query_not_retryable() {
        let err = RoutingFailure::InvalidQuery("empty query".into());
        assert!(!err.is_retryable());
        assert!(err.exclusions().is_empty());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RoutingFailure>();
        assert_send_sync::<CacheError>();
    }
}
