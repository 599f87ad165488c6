//! The router: one entry point that sequences every engine component.
//!
//! The router holds no per-query state. Everything it mutates (health,
//! circuits, counters, cache) lives in injected, shared components, so
//! several routers can run side by side in one process.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::{Invalidation, TieredCache};
use crate::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::classify::{classify, effective_content_type, select_strategy};
use crate::config::EngineConfig;
use crate::error::{DenialReason, Exclusion, ExclusionReason, ProviderFailure, Result, RoutingFailure};
use crate::fingerprint::Fingerprint;
use crate::gatekeeper::{Clock, GateStatus, Gatekeeper, ProviderLimits, SystemClock};
use crate::merger::{MergeContext, ResultMerger, SourceWeight};
use crate::provider::Provider;
use crate::registry::{Health, ProviderDescriptor, ProviderRegistry};
use crate::scorer::{rank_candidates, DefaultScorer, PerformanceStats, PerformanceTracker, ProviderScorer};
use crate::strategy::{
    compute_deadline, Candidate, CascadeStrategy, DispatchContext, ExecutionStrategy, ParallelStrategy,
};
use crate::types::{CallOutcome, MergedResult, ProviderReport, Query, RawProviderResult, StrategyKind};

/// Operational view of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthReport {
    pub health: Health,
    pub enabled: bool,
    pub circuit: CircuitSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttled: Option<DenialReason>,
    pub gate: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceStats>,
}

/// Assembles a [`Router`]. Parts not supplied are built from the config.
pub struct RouterBuilder {
    config: EngineConfig,
    providers: Vec<(ProviderDescriptor, Arc<dyn Provider>)>,
    limits: Vec<(String, ProviderLimits)>,
    registry: Option<Arc<ProviderRegistry>>,
    clock: Option<Arc<dyn Clock>>,
    gatekeeper: Option<Arc<Gatekeeper>>,
    breaker: Option<Arc<CircuitBreaker>>,
    cache: Option<Arc<TieredCache>>,
    tracker: Option<Arc<PerformanceTracker>>,
    scorer: Option<Arc<dyn ProviderScorer>>,
    parallel: Option<Arc<dyn ExecutionStrategy>>,
    cascade: Option<Arc<dyn ExecutionStrategy>>,
}

impl RouterBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            limits: Vec::new(),
            registry: None,
            clock: None,
            gatekeeper: None,
            breaker: None,
            cache: None,
            tracker: None,
            scorer: None,
            parallel: None,
            cascade: None,
        }
    }

    /// Register a provider shim with its descriptor.
    pub fn provider(mut self, descriptor: ProviderDescriptor, provider: Arc<dyn Provider>) -> Self {
        self.providers.push((descriptor, provider));
        self
    }

    /// Admission limits for one provider; others use `default_limits`.
    pub fn limits(mut self, provider: impl Into<String>, limits: ProviderLimits) -> Self {
        self.limits.push((provider.into(), limits));
        self
    }

    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Clock for the default gatekeeper. Ignored when a gatekeeper is supplied.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn gatekeeper(mut self, gatekeeper: Arc<Gatekeeper>) -> Self {
        self.gatekeeper = Some(gatekeeper);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn tracker(mut self, tracker: Arc<PerformanceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn ProviderScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn parallel_strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.parallel = Some(strategy);
        self
    }

    pub fn cascade_strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.cascade = Some(strategy);
        self
    }

    /// Validate everything and wire the router.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingFailure::Config`] for invalid configuration, a
    /// descriptor whose id differs from its shim's, a duplicate provider,
    /// or invalid provider limits.
    pub fn build(self) -> Result<Router> {
        self.config.validate()?;
        let config = self.config;

        let registry = self.registry.unwrap_or_default();
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        for (descriptor, provider) in self.providers {
            if descriptor.id != provider.id() {
                return Err(RoutingFailure::Config(format!(
                    "descriptor id {} does not match provider id {}",
                    descriptor.id,
                    provider.id()
                )));
            }
            if providers.insert(descriptor.id.clone(), provider).is_some() {
                return Err(RoutingFailure::Config(format!("provider {} registered twice", descriptor.id)));
            }
            registry.register(descriptor);
        }

        let gatekeeper = match self.gatekeeper {
            Some(gatekeeper) => gatekeeper,
            None => {
                let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
                Arc::new(Gatekeeper::with_default_limits(clock, config.default_limits.clone()))
            }
        };
        for (provider, limits) in self.limits {
            limits
                .validate()
                .map_err(|e| RoutingFailure::Config(format!("{provider}: {e}")))?;
            gatekeeper.set_limits(&provider, limits);
        }

        let tracker = self
            .tracker
            .unwrap_or_else(|| Arc::new(PerformanceTracker::new(config.scorer.ema_alpha)));
        let scorer = self
            .scorer
            .unwrap_or_else(|| Arc::new(DefaultScorer::new(config.scorer.clone(), Arc::clone(&tracker))));

        tracing::info!(
            providers = providers.len(),
            default_strategy = %config.default_strategy,
            cache = config.cache.enabled,
            "router ready"
        );

        Ok(Router {
            registry,
            providers,
            gatekeeper,
            breaker: self
                .breaker
                .unwrap_or_else(|| Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()))),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(TieredCache::new(config.cache.clone()))),
            tracker,
            scorer,
            merger: ResultMerger::new(config.merger.clone()),
            parallel: self.parallel.unwrap_or_else(|| Arc::new(ParallelStrategy)),
            cascade: self
                .cascade
                .unwrap_or_else(|| Arc::new(CascadeStrategy::new(config.cascade.clone()))),
            config,
        })
    }
}

/// Routes queries to providers and returns one merged, ranked answer.
pub struct Router {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    providers: HashMap<String, Arc<dyn Provider>>,
    gatekeeper: Arc<Gatekeeper>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<TieredCache>,
    tracker: Arc<PerformanceTracker>,
    scorer: Arc<dyn ProviderScorer>,
    merger: ResultMerger,
    parallel: Arc<dyn ExecutionStrategy>,
    cascade: Arc<dyn ExecutionStrategy>,
}

impl Router {
    pub fn builder(config: EngineConfig) -> RouterBuilder {
        RouterBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn gatekeeper(&self) -> &Arc<Gatekeeper> {
        &self.gatekeeper
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Answer `query` from cache or by dispatching to providers.
    ///
    /// # Errors
    ///
    /// - [`RoutingFailure::InvalidQuery`] for empty text or zero max results
    /// - [`RoutingFailure::NoEligibleProviders`] when every candidate was
    ///   excluded before a call was made
    /// - [`RoutingFailure::AllProvidersFailed`] when every called provider
    ///   failed or timed out
    pub async fn route(&self, query: &Query) -> Result<MergedResult> {
        let fingerprint = Fingerprint::of(query);
        let request_id = query
            .request_id()
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_owned);
        let span = tracing::info_span!("route", request_id = %request_id, fingerprint = %fingerprint);
        self.route_inner(query, fingerprint).instrument(span).await
    }

    async fn route_inner(&self, query: &Query, fingerprint: Fingerprint) -> Result<MergedResult> {
        let started = Instant::now();
        if query.text().is_empty() {
            return Err(RoutingFailure::InvalidQuery("query text is empty".into()));
        }
        if query.max_results() == 0 {
            return Err(RoutingFailure::InvalidQuery("max_results must be greater than 0".into()));
        }
        tracing::trace!(query = %query.text(), "routing query");

        // 1. Classify.
        let profile = classify(query);
        let content_type = effective_content_type(query, &profile);

        // 2. Cache lookup. A hit skips everything below.
        if let Some(hit) = self.cache.get(&fingerprint).await {
            tracing::debug!(tier = ?hit.served_from, items = hit.items.len(), "cache hit");
            return Ok(hit);
        }

        // 3. Candidate set, scored and ranked.
        let (eligible, mut excluded) = self.candidates(query);
        let ranked = rank_candidates(self.scorer.as_ref(), query, content_type, eligible);

        // 4. Admission.
        let mut admitted = Vec::with_capacity(ranked.len());
        for scored in ranked {
            let id = scored.descriptor.id.clone();
            match self.gatekeeper.admit(&id, scored.estimated_cost) {
                Ok(permit) => {
                    self.registry.clear_throttled(&id);
                    let Some(provider) = self.providers.get(&id) else {
                        excluded.push(Exclusion::new(id, ExclusionReason::NotRegistered));
                        continue;
                    };
                    admitted.push(Candidate {
                        descriptor: scored.descriptor,
                        provider: Arc::clone(provider),
                        permit,
                        score: scored.score,
                    });
                }
                Err(reason) => {
                    tracing::debug!(provider = %id, reason = %reason, "admission denied");
                    self.registry.mark_throttled(&id, reason);
                    excluded.push(Exclusion::new(id, ExclusionReason::AdmissionDenied(reason)));
                }
            }
        }
        if admitted.is_empty() {
            tracing::warn!(excluded = excluded.len(), "no eligible providers");
            return Err(RoutingFailure::NoEligibleProviders { excluded });
        }

        // 5. Strategy and deadline.
        let candidate_cost: f64 = admitted.iter().map(|c| c.descriptor.cost.per_query).sum();
        let kind = select_strategy(
            query,
            &profile,
            candidate_cost,
            self.config.cascade_cost_threshold,
            self.config.default_strategy,
        );
        let budget = compute_deadline(&self.config.deadline, &profile, query.hints().deadline);
        let weights: BTreeMap<String, SourceWeight> = admitted
            .iter()
            .map(|c| (c.descriptor.id.clone(), SourceWeight::from(&c.descriptor)))
            .collect();
        tracing::debug!(
            strategy = %kind,
            candidates = admitted.len(),
            deadline_ms = budget.as_millis() as u64,
            "dispatching"
        );

        // 6. Execute. The budget starts here, after the cache miss settled.
        // Dropping this future cancels every in-flight call.
        let dispatch_started = Instant::now();
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let ctx = DispatchContext {
            breaker: Arc::clone(&self.breaker),
            tracker: Arc::clone(&self.tracker),
            registry: Arc::clone(&self.registry),
            deadline: dispatch_started + budget,
            cancel,
        };
        let dispatch = self.strategy(kind).execute(query, admitted, &ctx).await;
        excluded.extend(dispatch.excluded);
        let results = dispatch.results;

        if results.is_empty() {
            tracing::warn!(excluded = excluded.len(), "every candidate was excluded at call time");
            return Err(RoutingFailure::NoEligibleProviders { excluded });
        }
        if !results.iter().any(|r| r.outcome.is_success()) {
            let failures = failures_of(&results);
            tracing::warn!(failed = failures.len(), "all providers failed");
            return Err(RoutingFailure::AllProvidersFailed { failures, excluded });
        }

        // 7. Merge.
        let mut merge_ctx = MergeContext::new(query.max_results().min(self.config.max_results));
        merge_ctx.time_sensitive = profile.time_sensitive;
        merge_ctx.include_raw_content = query.include_raw_content();
        let items = self.merger.merge(&results, &weights, &merge_ctx);

        let partial = results.iter().any(|r| !r.outcome.is_success());
        let merged = MergedResult {
            items,
            strategy: kind,
            providers: results.iter().map(report_of).collect(),
            partial,
            generated_at: Utc::now(),
            served_from: None,
        };

        // 8. Cache. Partial answers are kept only for the fast-tier TTL.
        let ttl = if partial {
            self.config.cache.memory_ttl()
        } else {
            self.config.cache.distributed_ttl()
        };
        self.cache.put(fingerprint, &merged, ttl).await;

        tracing::info!(
            strategy = %kind,
            items = merged.items.len(),
            providers = merged.providers.len(),
            partial,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query routed"
        );
        Ok(merged)
    }

    /// Registered, allowed, enabled providers whose circuit is not open.
    fn candidates(&self, query: &Query) -> (Vec<ProviderDescriptor>, Vec<Exclusion>) {
        let allow: Option<&BTreeSet<String>> = query.hints().providers.as_ref();
        let mut excluded = Vec::new();
        if let Some(allow) = allow {
            for id in allow.iter().filter(|id| !self.registry.contains(id)) {
                excluded.push(Exclusion::new(id.clone(), ExclusionReason::NotRegistered));
            }
        }

        let mut eligible = Vec::new();
        for descriptor in self.registry.all() {
            if allow.is_some_and(|allow| !allow.contains(&descriptor.id)) {
                continue;
            }
            let reason = if !descriptor.enabled {
                Some(ExclusionReason::Disabled)
            } else if !self.providers.contains_key(&descriptor.id) {
                Some(ExclusionReason::NotRegistered)
            } else if self.breaker.is_blocked(&descriptor.id) {
                Some(ExclusionReason::CircuitOpen)
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    tracing::debug!(provider = %descriptor.id, reason = %reason, "provider excluded");
                    excluded.push(Exclusion::new(descriptor.id, reason));
                }
                None => eligible.push(descriptor),
            }
        }
        (eligible, excluded)
    }

    fn strategy(&self, kind: StrategyKind) -> &dyn ExecutionStrategy {
        match kind {
            StrategyKind::Parallel => self.parallel.as_ref(),
            StrategyKind::Cascade => self.cascade.as_ref(),
        }
    }

    /// Health, circuit, admission, and performance state per provider.
    pub fn health(&self) -> BTreeMap<String, ProviderHealthReport> {
        self.registry
            .all()
            .into_iter()
            .map(|descriptor| {
                let report = ProviderHealthReport {
                    health: descriptor.health,
                    enabled: descriptor.enabled,
                    circuit: self.breaker.snapshot(&descriptor.id),
                    throttled: descriptor.throttled,
                    gate: self.gatekeeper.status(&descriptor.id),
                    performance: self.tracker.stats(&descriptor.id),
                };
                (descriptor.id, report)
            })
            .collect()
    }

    /// Take a provider out of rotation and drop cached answers that name it.
    /// Returns `false` for unknown providers.
    pub async fn disable_provider(&self, id: &str) -> bool {
        if !self.registry.set_enabled(id, false) {
            return false;
        }
        self.registry.set_health(id, Health::Unavailable);
        self.cache.invalidate(Invalidation::Provider(id.to_owned())).await;
        tracing::info!(provider = %id, "provider disabled");
        true
    }

    pub fn enable_provider(&self, id: &str) -> bool {
        if !self.registry.set_enabled(id, true) {
            return false;
        }
        self.registry
            .set_health(id, Health::from_circuit(self.breaker.state(id)));
        tracing::info!(provider = %id, "provider enabled");
        true
    }

    /// Close the provider's circuit and forget its performance history.
    pub fn reset_provider(&self, id: &str) -> bool {
        if !self.registry.contains(id) {
            return false;
        }
        self.breaker.reset(id);
        self.tracker.reset(id);
        self.registry.set_health(id, Health::Healthy);
        tracing::info!(provider = %id, "provider reset");
        true
    }

    pub async fn invalidate(&self, what: Invalidation) {
        self.cache.invalidate(what).await;
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("providers", &self.providers.keys().collect::<BTreeSet<_>>())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn failures_of(results: &[RawProviderResult]) -> Vec<ProviderFailure> {
    results
        .iter()
        .filter_map(|r| match &r.outcome {
            CallOutcome::Failed(error) => Some(ProviderFailure {
                provider: r.provider.clone(),
                error: error.clone(),
            }),
            CallOutcome::Success => None,
        })
        .collect()
}

fn report_of(result: &RawProviderResult) -> ProviderReport {
    ProviderReport {
        provider: result.provider.clone(),
        outcome: result.outcome.clone(),
        items: result.items.len(),
        latency_ms: result.latency.as_millis() as u64,
    }
}
