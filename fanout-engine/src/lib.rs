//! # fanout-engine
//!
//! Query routing and result aggregation across independent search and
//! content providers.
//!
//! A [`Router`] decides which providers to ask and how, calls them under a
//! hard deadline, and folds their answers into one deduplicated, ranked
//! [`MergedResult`]. Providers are opaque async capabilities implementing
//! [`Provider`]; this crate contains no transport code of its own.
//!
//! ## Design
//!
//! - Per-provider admission control: fixed-window rate limits, spend
//!   budgets, and a concurrency semaphore ([`Gatekeeper`])
//! - Per-provider circuit breaking with half-open trials and growing
//!   cooldowns ([`CircuitBreaker`])
//! - Pluggable provider scoring ([`ProviderScorer`]) driven by content-type
//!   affinity, observed performance, and declared cost
//! - Parallel and cascade execution ([`ExecutionStrategy`]) with deadlines
//!   derived from query complexity
//! - A fast in-process cache backed by an optional distributed tier
//!   ([`TieredCache`]); a slow or absent distributed tier never fails a
//!   request
//! - Four-stage dedup and composite ranking ([`ResultMerger`])
//!
//! ## Privacy
//!
//! Query text is logged only at trace level.
//!
//! ## Examples
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use fanout_engine::{EngineConfig, Provider, ProviderDescriptor, Query, Router};
//! # async fn example(web: Arc<dyn Provider>) -> fanout_engine::Result<()> {
//! let router = Router::builder(EngineConfig::default())
//!     .provider(ProviderDescriptor::new(web.id()), web)
//!     .build()?;
//! let result = router.route(&Query::new("rust async runtimes")).await?;
//! for item in &result.items {
//!     println!("{:.3} {} ({})", item.score, item.title, item.url);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gatekeeper;
pub mod merger;
pub mod provider;
pub mod registry;
pub mod router;
pub mod scorer;
pub mod strategy;
pub mod types;

pub use cache::{DistributedBackend, InMemoryBackend, Invalidation, TieredCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitDecision, CircuitSnapshot, CircuitState};
pub use config::{CacheConfig, CascadeConfig, DeadlineConfig, EngineConfig, MergerConfig, ScorerConfig};
pub use error::{
    BudgetTier, CacheError, DenialReason, Exclusion, ExclusionReason, ProviderError, ProviderFailure, RateTier,
    Result, RoutingFailure,
};
pub use fingerprint::Fingerprint;
pub use gatekeeper::{AdmissionPermit, Clock, Gatekeeper, ManualClock, ProviderLimits, SystemClock};
pub use merger::ResultMerger;
pub use provider::{CallContext, Provider};
pub use registry::{CostModel, Health, ProviderDescriptor, ProviderRegistry};
pub use router::{ProviderHealthReport, Router, RouterBuilder};
pub use scorer::{DefaultScorer, PerformanceTracker, ProviderScorer};
pub use strategy::{CascadeStrategy, ExecutionStrategy, ParallelStrategy, StopPolicy};
pub use types::{
    CacheTier, CallOutcome, ContentType, DedupMethod, MergedItem, MergedResult, ProviderReport, Query,
    RawProviderResult, ResultItem, StrategyKind,
};
