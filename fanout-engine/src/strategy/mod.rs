//! Execution strategies: how admitted providers are actually called.
//!
//! Both strategies share [`invoke_candidate`], which wraps one provider
//! call: last-moment circuit check, permit commit, hard timeout, cost
//! settlement, and outcome bookkeeping (breaker, performance tracker,
//! registry health). A call that outlives its slice of the deadline is
//! dropped and recorded as a timeout.

mod cascade;
mod parallel;

pub use cascade::{CascadeStrategy, StopPolicy};
pub use parallel::ParallelStrategy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{CircuitBreaker, CircuitDecision};
use crate::classify::QueryProfile;
use crate::config::DeadlineConfig;
use crate::error::{Exclusion, ExclusionReason, ProviderError};
use crate::gatekeeper::AdmissionPermit;
use crate::provider::{CallContext, Provider};
use crate::registry::{Health, ProviderDescriptor, ProviderRegistry};
use crate::scorer::PerformanceTracker;
use crate::types::{CallOutcome, Query, RawProviderResult, StrategyKind};

/// A scored, admitted provider ready to be called.
pub struct Candidate {
    pub descriptor: ProviderDescriptor,
    pub provider: Arc<dyn Provider>,
    pub permit: AdmissionPermit,
    pub score: f64,
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.descriptor.id)
            .field("score", &self.score)
            .field("permit", &self.permit)
            .finish()
    }
}

/// Shared state and limits for one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub breaker: Arc<CircuitBreaker>,
    pub tracker: Arc<PerformanceTracker>,
    pub registry: Arc<ProviderRegistry>,
    /// Hard ceiling: nothing is awaited past this instant.
    pub deadline: Instant,
    /// Fired when the whole request is abandoned.
    pub cancel: CancellationToken,
}

impl DispatchContext {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// What a strategy produced.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// One entry per provider actually called, in call order.
    pub results: Vec<RawProviderResult>,
    /// Providers skipped at call time (circuit opened since admission).
    pub excluded: Vec<Exclusion>,
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Call `candidates` (already in score order) and collect their results.
    async fn execute(&self, query: &Query, candidates: Vec<Candidate>, ctx: &DispatchContext) -> Dispatch;
}

/// Overall time budget for a query.
///
/// `base + per_term × (terms − 1) + structured bonus + facet bonus × (facets − 1)`,
/// clamped to `[min, max]`. A caller hint replaces the computed value and
/// is only capped at `max`.
pub fn compute_deadline(config: &DeadlineConfig, profile: &QueryProfile, hint: Option<Duration>) -> Duration {
    if let Some(hint) = hint {
        return hint.min(config.max());
    }
    let extra_terms = profile.terms.saturating_sub(1) as u64;
    let extra_facets = profile.facets.saturating_sub(1) as u64;
    let mut ms = config.base_ms
        + config.per_term_ms.saturating_mul(extra_terms)
        + config.facet_bonus_ms.saturating_mul(extra_facets);
    if profile.structured {
        ms += config.structured_bonus_ms;
    }
    Duration::from_millis(ms).clamp(config.min(), config.max())
}

pub(crate) enum CallResult {
    Completed(RawProviderResult),
    Skipped(Exclusion),
}

/// Call one candidate with a hard deadline of `call_deadline`.
pub(crate) async fn invoke_candidate(
    query: &Query,
    candidate: Candidate,
    call_deadline: Instant,
    ctx: &DispatchContext,
) -> CallResult {
    let Candidate {
        descriptor,
        provider,
        mut permit,
        ..
    } = candidate;
    let id = descriptor.id.as_str();

    match ctx.breaker.try_acquire(id) {
        CircuitDecision::Rejected => {
            tracing::debug!(provider = %id, reason = "circuit_open", "provider excluded at call time");
            return CallResult::Skipped(Exclusion::new(id, ExclusionReason::CircuitOpen));
        }
        CircuitDecision::Trial => {
            tracing::debug!(provider = %id, "issuing half-open trial call");
        }
        CircuitDecision::Allowed => {}
    }

    permit.commit();
    let call_deadline = call_deadline.min(ctx.deadline);
    let timeout = call_deadline.saturating_duration_since(Instant::now());
    let call_cancel = ctx.cancel.child_token();
    // Signals the shim to release resources however the call ends.
    let _cancel_on_exit = call_cancel.clone().drop_guard();

    let started = Instant::now();
    let outcome = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => Err(ProviderError::Timeout),
        res = tokio::time::timeout_at(
            call_deadline,
            provider.invoke(query, CallContext::new(timeout, call_cancel.clone())),
        ) => res.unwrap_or(Err(ProviderError::Timeout)),
    };
    let latency = started.elapsed();

    let result = match outcome {
        Ok(items) => {
            permit.settle(descriptor.cost.estimate(items.len()));
            RawProviderResult::success(id, items, latency)
        }
        Err(error) => RawProviderResult::failure(id, error, latency),
    };
    record_outcome(&result, ctx);
    CallResult::Completed(result)
}

fn record_outcome(result: &RawProviderResult, ctx: &DispatchContext) {
    let id = result.provider.as_str();
    let latency_ms = result.latency.as_millis() as u64;
    let state = match &result.outcome {
        CallOutcome::Success => {
            tracing::debug!(provider = %id, latency_ms, items = result.items.len(), "provider call succeeded");
            ctx.breaker.record_success(id)
        }
        CallOutcome::Failed(error) => {
            if error.is_configuration() {
                tracing::error!(provider = %id, error = %error, latency_ms, "provider configuration problem");
            } else {
                tracing::warn!(provider = %id, error = %error, latency_ms, "provider call failed");
            }
            ctx.breaker.record_failure(id)
        }
    };
    ctx.tracker.record(id, result.outcome.is_success(), result.latency);
    ctx.registry.set_health(id, Health::from_circuit(state));
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::ProviderError;
    use crate::gatekeeper::{Gatekeeper, SystemClock};
    use crate::types::ResultItem;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that sleeps, then answers with fixed items or an error.
    pub(crate) struct ScriptedProvider {
        pub id: String,
        pub latency: Duration,
        pub result: Result<Vec<ResultItem>, ProviderError>,
        pub calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub(crate) fn ok(id: &str, latency_ms: u64, urls: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_owned(),
                latency: Duration::from_millis(latency_ms),
                result: Ok(urls
                    .iter()
                    .map(|u| ResultItem::new(*u, format!("{id} result")))
                    .collect()),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn failing(id: &str, latency_ms: u64, error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_owned(),
                latency: Duration::from_millis(latency_ms),
                result: Err(error),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn invoke(&self, _query: &Query, _ctx: CallContext) -> Result<Vec<ResultItem>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.result.clone()
        }
    }

    pub(crate) fn context(deadline: Duration) -> DispatchContext {
        DispatchContext {
            breaker: Arc::new(CircuitBreaker::default()),
            tracker: Arc::new(PerformanceTracker::default()),
            registry: Arc::new(ProviderRegistry::new()),
            deadline: Instant::now() + deadline,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn candidates(gatekeeper: &Gatekeeper, providers: &[Arc<ScriptedProvider>]) -> Vec<Candidate> {
        providers
            .iter()
            .map(|p| Candidate {
                descriptor: ProviderDescriptor::new(p.id.clone()),
                provider: Arc::clone(p) as Arc<dyn Provider>,
                permit: gatekeeper.admit(&p.id, 0.0).expect("admitted"),
                score: 1.0,
            })
            .collect()
    }

    pub(crate) fn gatekeeper() -> Gatekeeper {
        Gatekeeper::new(Arc::new(SystemClock))
    }
}
