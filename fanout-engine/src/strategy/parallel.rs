use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::Instant;

use crate::types::{Query, StrategyKind};

use super::{invoke_candidate, CallResult, Candidate, Dispatch, DispatchContext, ExecutionStrategy};

/// Call every candidate at once and wait for all of them, bounded by the
/// shared deadline. Calls still pending at the deadline are dropped and
/// reported as timeouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelStrategy;

#[async_trait]
impl ExecutionStrategy for ParallelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Parallel
    }

    async fn execute(&self, query: &Query, candidates: Vec<Candidate>, ctx: &DispatchContext) -> Dispatch {
        let started = Instant::now();
        tracing::debug!(candidates = candidates.len(), remaining_ms = ctx.remaining().as_millis() as u64, "parallel dispatch");

        let calls = candidates.into_iter().map(|candidate| {
            let call_deadline = started + candidate.descriptor.base_timeout;
            invoke_candidate(query, candidate, call_deadline, ctx)
        });

        let mut dispatch = Dispatch::default();
        for call in join_all(calls).await {
            match call {
                CallResult::Completed(result) => dispatch.results.push(result),
                CallResult::Skipped(exclusion) => dispatch.excluded.push(exclusion),
            }
        }
        dispatch
    }
}
