use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CascadeConfig;
use crate::error::{Exclusion, ExclusionReason};
use crate::scorer::PerformanceTracker;
use crate::types::{Query, RawProviderResult, StrategyKind};

use super::{invoke_candidate, CallResult, Candidate, Dispatch, DispatchContext, ExecutionStrategy};

/// When a cascade has heard enough.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopPolicy {
    /// Stop at the first successful call that returned at least one item.
    #[default]
    FirstSuccess,
    /// Stop once this many distinct URLs have been collected, counting only
    /// items whose native score (when present) reaches `min_score`.
    EnoughResults {
        min_results: usize,
        #[serde(default)]
        min_score: Option<f64>,
    },
}

impl StopPolicy {
    pub fn is_satisfied(&self, results: &[RawProviderResult]) -> bool {
        match self {
            Self::FirstSuccess => results
                .iter()
                .any(|r| r.outcome.is_success() && !r.items.is_empty()),
            Self::EnoughResults {
                min_results,
                min_score,
            } => {
                let urls: HashSet<&str> = results
                    .iter()
                    .filter(|r| r.outcome.is_success())
                    .flat_map(|r| r.items.iter())
                    .filter(|item| match (min_score, item.native_score) {
                        (Some(min), Some(score)) => score >= *min,
                        _ => true,
                    })
                    .map(|item| item.url.trim())
                    .filter(|url| !url.is_empty())
                    .collect();
                urls.len() >= *min_results
            }
        }
    }
}

/// Call candidates one at a time in score order until the stop policy is
/// met, the candidates run out, or the deadline passes.
///
/// Each call gets a slice of the remaining time proportional to its
/// expected latency among the providers still in line, never less than
/// `min_slice` and never past the deadline.
#[derive(Debug, Clone, Default)]
pub struct CascadeStrategy {
    config: CascadeConfig,
}

impl CascadeStrategy {
    pub fn new(config: CascadeConfig) -> Self {
        Self { config }
    }

    pub fn policy(&self) -> &StopPolicy {
        &self.config.stop_policy
    }

    fn slice(&self, remaining: Duration, expected: &[Duration]) -> Duration {
        let total: Duration = expected.iter().sum();
        let share = match expected.first() {
            Some(first) if !total.is_zero() => remaining.mul_f64(first.as_secs_f64() / total.as_secs_f64()),
            _ => remaining,
        };
        share.max(self.config.min_slice()).min(remaining)
    }
}

/// Observed average latency, else the declared timeout.
fn expected_latency(tracker: &Arc<PerformanceTracker>, candidate: &Candidate) -> Duration {
    tracker
        .stats(candidate.id())
        .filter(|s| s.samples > 0 && s.latency_ms > 0.0)
        .map_or(candidate.descriptor.base_timeout, |s| {
            Duration::from_secs_f64(s.latency_ms / 1_000.0)
        })
}

#[async_trait]
impl ExecutionStrategy for CascadeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Cascade
    }

    async fn execute(&self, query: &Query, candidates: Vec<Candidate>, ctx: &DispatchContext) -> Dispatch {
        let mut expected: Vec<Duration> = candidates
            .iter()
            .map(|c| expected_latency(&ctx.tracker, c))
            .collect();
        let mut dispatch = Dispatch::default();
        let mut queue = candidates.into_iter();

        while let Some(candidate) = queue.next() {
            let remaining = ctx.remaining();
            if remaining.is_zero() || ctx.cancel.is_cancelled() {
                tracing::debug!(skipped = queue.len() + 1, "cascade deadline reached");
                dispatch.excluded.extend(
                    std::iter::once(candidate)
                        .chain(queue.by_ref())
                        .map(|c| Exclusion::new(c.id(), ExclusionReason::DeadlineReached)),
                );
                break;
            }
            let slice = self.slice(remaining, &expected);
            expected.remove(0);
            tracing::debug!(provider = %candidate.id(), slice_ms = slice.as_millis() as u64, "cascade step");

            match invoke_candidate(query, candidate, Instant::now() + slice, ctx).await {
                CallResult::Completed(result) => dispatch.results.push(result),
                CallResult::Skipped(exclusion) => dispatch.excluded.push(exclusion),
            }
            if self.config.stop_policy.is_satisfied(&dispatch.results) {
                tracing::debug!(unreached = queue.len(), "cascade stop policy satisfied");
                break;
            }
        }
        // Unreached candidates drop here, refunding their reservations.
        dispatch
    }
}
