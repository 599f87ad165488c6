//! Contract for provider transport shims.
//!
//! Each external search/content provider is wrapped by a thin shim that
//! implements [`Provider`]. The engine treats shims as opaque async
//! capabilities: it decides whether and when to call them, bounds every
//! call with a timeout, and cancels calls that outlive the query deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::types::{Query, ResultItem};

/// Per-call context handed to a provider.
///
/// `cancel` fires when the query deadline passes or the request is
/// abandoned. Shims holding connections or subprocesses should select on
/// it and release them; the engine also drops the call future.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }
}

/// A pluggable provider backend.
///
/// Implementations must be `Send + Sync`; the parallel strategy calls
/// several providers concurrently.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id, matching its [`ProviderDescriptor`](crate::ProviderDescriptor).
    fn id(&self) -> &str;

    /// Run `query` against the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the provider cannot produce results.
    /// Returning an empty list is a success with no items.
    async fn invoke(&self, query: &Query, ctx: CallContext) -> Result<Vec<ResultItem>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockProvider {
        id: &'static str,
        items: Vec<ResultItem>,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn id(&self) -> &str {
            self.id
        }

        async fn invoke(&self, _query: &Query, _ctx: CallContext) -> Result<Vec<ResultItem>, ProviderError> {
            if self.items.is_empty() {
                return Err(ProviderError::Malformed("mock provider failure".into()));
            }
            Ok(self.items.clone())
        }
    }

    fn ctx() -> CallContext {
        CallContext::new(Duration::from_secs(1), CancellationToken::new())
    }

    #[test]
    fn provider_is_object_safe_and_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn Provider>();
    }

    #[tokio::test]
    async fn mock_provider_returns_results() {
        let provider = MockProvider {
            id: "exa",
            items: vec![ResultItem::new("https://test.com", "Test")],
        };
        let items = provider
            .invoke(&Query::new("test"), ctx())
            .await
            .expect("should succeed");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Test");
        assert_eq!(provider.id(), "exa");
    }

    #[tokio::test]
    async fn mock_provider_propagates_errors() {
        let provider = MockProvider { id: "exa", items: vec![] };
        let err = provider.invoke(&Query::new("test"), ctx()).await.unwrap_err();
        assert!(err.to_string().contains("mock provider failure"));
        assert!(err.is_configuration());
    }
}
