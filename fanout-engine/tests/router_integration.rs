//! End-to-end routing tests against scripted in-process providers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fanout_engine::{
    BudgetTier, CacheConfig, CacheError, CacheTier, CallContext, CallOutcome, CircuitBreakerConfig,
    CircuitState, ContentType, CostModel, DenialReason, DistributedBackend, EngineConfig,
    ExclusionReason, Health, InMemoryBackend,
    Provider, ProviderDescriptor, ProviderError, ProviderLimits, Query, ResultItem, Router,
    RoutingFailure, StrategyKind, TieredCache,
};

/// Answers after `latency` with fixed items, or fails while `failing` is set.
struct Scripted {
    id: &'static str,
    latency: Duration,
    items: Vec<ResultItem>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(id: &'static str, latency_ms: u64, pages: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            id,
            latency: Duration::from_millis(latency_ms),
            items: pages
                .iter()
                .map(|(url, title)| ResultItem::new(*url, *title))
                .collect(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(id: &'static str, latency_ms: u64) -> Arc<Self> {
        let provider = Self::new(id, latency_ms, &[]);
        provider.failing.store(true, Ordering::SeqCst);
        provider
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for Scripted {
    fn id(&self) -> &str {
        self.id
    }

    async fn invoke(&self, _query: &Query, _ctx: CallContext) -> Result<Vec<ResultItem>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unreachable("connection reset".into()));
        }
        Ok(self.items.clone())
    }
}

fn router_with(config: EngineConfig, providers: &[(ProviderDescriptor, Arc<Scripted>)]) -> Router {
    providers
        .iter()
        .fold(Router::builder(config), |builder, (descriptor, provider)| {
            builder.provider(descriptor.clone(), Arc::clone(provider) as Arc<dyn Provider>)
        })
        .build()
        .expect("router builds")
}

#[tokio::test(start_paused = true)]
async fn parallel_deadline_drops_slow_provider() {
    let fast = Scripted::new("fast", 50, &[("https://fast.example/a", "Fast answer")]);
    let slow = Scripted::new("slow", 5_000, &[("https://slow.example/a", "Slow answer")]);
    let router = router_with(
        EngineConfig::default(),
        &[
            (ProviderDescriptor::new("fast"), fast),
            (ProviderDescriptor::new("slow"), slow),
        ],
    );

    let started = tokio::time::Instant::now();
    let result = router
        .route(
            &Query::new("deadline test")
                .with_strategy(StrategyKind::Parallel)
                .with_deadline(Duration::from_millis(200)),
        )
        .await
        .expect("routed");

    assert!(started.elapsed() <= Duration::from_millis(210));
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].url, "https://fast.example/a");
    assert!(result.partial);
    let slow_report = result
        .providers
        .iter()
        .find(|r| r.provider == "slow")
        .expect("slow reported");
    assert_eq!(slow_report.outcome, CallOutcome::Failed(ProviderError::Timeout));
}

#[tokio::test(start_paused = true)]
async fn cascade_stops_after_first_success() {
    let a = Scripted::failing("a", 20);
    let b = Scripted::new("b", 20, &[("https://b.example/1", "From b")]);
    let c = Scripted::new("c", 20, &[("https://c.example/1", "From c")]);
    let router = router_with(
        EngineConfig::default(),
        &[
            (ProviderDescriptor::new("a").with_affinity(ContentType::Web, 0.9), Arc::clone(&a)),
            (ProviderDescriptor::new("b").with_affinity(ContentType::Web, 0.8), Arc::clone(&b)),
            (ProviderDescriptor::new("c").with_affinity(ContentType::Web, 0.7), Arc::clone(&c)),
        ],
    );

    let result = router
        .route(
            &Query::new("cascade order")
                .with_content_type(ContentType::Web)
                .with_strategy(StrategyKind::Cascade),
        )
        .await
        .expect("routed");

    assert_eq!(result.strategy, StrategyKind::Cascade);
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 0));
    assert_eq!(result.items[0].providers, vec!["b".to_owned()]);
    assert_eq!(router.gatekeeper().status("c").in_flight, 0);
}

#[tokio::test]
async fn academic_query_merges_cross_provider_duplicates() {
    let x = Scripted::new(
        "x",
        5,
        &[
            ("https://arxiv.org/abs/2401.00001", "Logical qubits beyond break-even"),
            ("https://nature.com/articles/q-2024", "Quantum advantage in chemistry simulation"),
            ("https://quantamagazine.org/error-correction", "Error correction reaches a milestone"),
            ("https://science.org/doi/10.1126/qc.2024", "Neutral atom arrays scale up"),
            ("https://ieee.org/spectrum/quantum-2024", "Superconducting processors year in review"),
        ],
    );
    let y = Scripted::new(
        "y",
        5,
        &[
            ("https://science.org/doi/10.1126/qc.2024", "Neutral atom arrays scale up"),
            (
                "https://nature.com/articles/q-2024/?utm_source=feed",
                "Quantum advantage in chemistry simulation",
            ),
            ("https://physicsworld.com/topological-qubits", "Topological qubits revisited"),
        ],
    );
    let router = router_with(
        EngineConfig::default(),
        &[
            (ProviderDescriptor::new("x").with_affinity(ContentType::Academic, 0.9), x),
            (ProviderDescriptor::new("y").with_affinity(ContentType::Academic, 0.8), y),
        ],
    );

    let result = router
        .route(
            &Query::new("quantum computing breakthroughs 2024")
                .with_content_type(ContentType::Academic)
                .with_strategy(StrategyKind::Parallel),
        )
        .await
        .expect("routed");

    assert_eq!(result.items.len(), 6);
    assert!(!result.partial);
    assert!(result.items.windows(2).all(|w| w[0].score >= w[1].score));

    // Duplicates found by both providers are boosted to the top.
    assert_eq!(result.items[0].url, "https://science.org/doi/10.1126/qc.2024");
    assert_eq!(result.items[0].providers.len(), 2);
    assert_eq!(result.items[1].url, "https://nature.com/articles/q-2024");
    assert_eq!(
        result.items[1].alternate_urls,
        vec!["https://nature.com/articles/q-2024/?utm_source=feed".to_owned()]
    );
    assert!(result.items[2..].iter().all(|item| item.providers.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn open_circuit_excludes_then_trial_restores() {
    let config = EngineConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown_ms: 1_000,
            ..CircuitBreakerConfig::default()
        },
        ..EngineConfig::default()
    };
    let flaky = Scripted::failing("flaky", 10);
    let steady = Scripted::new("steady", 10, &[("https://steady.example/1", "Steady")]);
    let router = router_with(
        config,
        &[
            (
                ProviderDescriptor::new("flaky").with_affinity(ContentType::Web, 1.0),
                Arc::clone(&flaky),
            ),
            (ProviderDescriptor::new("steady"), steady),
        ],
    );
    let query = |n: usize| Query::new(&format!("circuit probe {n}")).with_strategy(StrategyKind::Parallel);

    for n in 0..2 {
        router.route(&query(n)).await.expect("steady answers");
    }
    assert_eq!(flaky.calls(), 2);
    let health = router.health();
    let report = &health["flaky"];
    assert_eq!(report.circuit.state, CircuitState::Open);
    assert_eq!(report.health, Health::Unavailable);

    // Open: excluded even though it is the top-scored provider.
    let result = router.route(&query(2)).await.expect("steady answers");
    assert_eq!(flaky.calls(), 2);
    assert!(result.providers.iter().all(|r| r.provider != "flaky"));

    // After the cooldown exactly one trial goes out; success closes the circuit.
    tokio::time::advance(Duration::from_millis(1_100)).await;
    flaky.failing.store(false, Ordering::SeqCst);
    router.route(&query(3)).await.expect("routed");
    assert_eq!(flaky.calls(), 3);
    let health = router.health();
    let report = &health["flaky"];
    assert_eq!(report.circuit.state, CircuitState::Closed);
    assert_eq!(report.circuit.consecutive_failures, 0);
    assert_eq!(report.health, Health::Healthy);
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let web = Scripted::new("web", 5, &[("https://web.example/1", "Cached page")]);
    let router = router_with(
        EngineConfig::default(),
        &[(ProviderDescriptor::new("web"), Arc::clone(&web))],
    );
    let query = Query::new("tokio select macro");

    let first = router.route(&query).await.expect("first");
    assert_eq!(first.served_from, None);
    let second = router
        .route(&query.clone().with_request_id("another-request"))
        .await
        .expect("second");
    assert_eq!(second.served_from, Some(CacheTier::Memory));
    assert_eq!(second.items, first.items);
    assert_eq!(web.calls(), 1);
}

#[tokio::test]
async fn distributed_outage_degrades_to_memory() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_offline(true);
    let cache = Arc::new(TieredCache::with_distributed(CacheConfig::default(), backend.clone()));
    let web = Scripted::new("web", 5, &[("https://web.example/1", "Page")]);
    let router = Router::builder(EngineConfig::default())
        .provider(ProviderDescriptor::new("web"), Arc::clone(&web) as Arc<dyn Provider>)
        .cache(cache)
        .build()
        .expect("router");
    let query = Query::new("cache outage");

    router.route(&query).await.expect("routed despite outage");
    let again = router.route(&query).await.expect("second");
    assert_eq!(again.served_from, Some(CacheTier::Memory));
    assert!(backend.is_empty());
    assert_eq!(web.calls(), 1);
}

#[tokio::test]
async fn quality_priority_does_not_share_cost_sensitive_cache_entry() {
    let web = Scripted::new("web", 5, &[("https://web.example/1", "Page")]);
    let router = Router::builder(EngineConfig::default())
        .provider(
            ProviderDescriptor::new("web").with_cost(CostModel::per_query(0.05)),
            Arc::clone(&web) as Arc<dyn Provider>,
        )
        .build()
        .expect("router");
    let query = Query::new("rust async runtime");

    let cost_sensitive = router.route(&query).await.expect("cost-sensitive");
    assert_eq!(cost_sensitive.served_from, None);

    let quality = query.clone().prioritize_quality();
    let first = router.route(&quality).await.expect("quality");
    assert_eq!(first.served_from, None);
    assert_eq!(web.calls(), 2);

    let again = router.route(&quality).await.expect("quality again");
    assert_eq!(again.served_from, Some(CacheTier::Memory));
    assert_eq!(web.calls(), 2);
}

/// Distributed tier that answers every lookup with a miss after `delay`.
struct SlowMissBackend {
    delay: Duration,
}

#[async_trait]
impl DistributedBackend for SlowMissBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn probe(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn slow_cache_miss_does_not_shrink_provider_deadline() {
    let backend = Arc::new(SlowMissBackend {
        delay: Duration::from_millis(45),
    });
    let cache = Arc::new(TieredCache::with_distributed(CacheConfig::default(), backend));
    let web = Scripted::new("web", 480, &[("https://web.example/1", "Page")]);
    let router = Router::builder(EngineConfig::default())
        .provider(ProviderDescriptor::new("web"), Arc::clone(&web) as Arc<dyn Provider>)
        .cache(cache)
        .build()
        .expect("router");

    let result = router
        .route(&Query::new("slow cache").with_deadline(Duration::from_millis(500)))
        .await
        .expect("provider fits its budget");
    assert_eq!(result.items.len(), 1);
    assert!(!result.partial);
}

#[tokio::test]
async fn budget_denial_surfaces_as_no_eligible_providers() {
    let pricey = Scripted::new("pricey", 5, &[("https://pricey.example/1", "Premium")]);
    let router = Router::builder(EngineConfig::default())
        .provider(
            ProviderDescriptor::new("pricey").with_cost(CostModel::per_query(0.05)),
            Arc::clone(&pricey) as Arc<dyn Provider>,
        )
        .limits(
            "pricey",
            ProviderLimits {
                max_cost_per_query: Some(0.01),
                ..ProviderLimits::default()
            },
        )
        .build()
        .expect("router");

    let err = router.route(&Query::new("expensive lookup")).await.unwrap_err();
    let RoutingFailure::NoEligibleProviders { excluded } = &err else {
        panic!("expected NoEligibleProviders, got {err:?}");
    };
    assert_eq!(excluded.len(), 1);
    assert_eq!(
        excluded[0].reason,
        ExclusionReason::AdmissionDenied(DenialReason::BudgetExceeded(BudgetTier::Query))
    );
    assert_eq!(pricey.calls(), 0);
    assert!(err.is_retryable());
}

/// Holds a "connection" while in flight and watches for cancellation.
struct Hanging {
    live: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

struct Connection(Arc<AtomicUsize>);

impl Drop for Connection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for Hanging {
    fn id(&self) -> &str {
        "hanging"
    }

    async fn invoke(&self, _query: &Query, ctx: CallContext) -> Result<Vec<ResultItem>, ProviderError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let _connection = Connection(Arc::clone(&self.live));
        let released = Arc::clone(&self.released);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            released.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_calls_release_their_resources() {
    let live = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let hanging = Arc::new(Hanging {
        live: Arc::clone(&live),
        released: Arc::clone(&released),
    });
    let web = Scripted::new("web", 10, &[("https://web.example/1", "Page")]);
    let router = Router::builder(EngineConfig::default())
        .provider(ProviderDescriptor::new("hanging"), hanging)
        .provider(ProviderDescriptor::new("web"), web as Arc<dyn Provider>)
        .build()
        .expect("router");

    // Deadline fires: the hanging call is dropped and reported as a timeout.
    let result = router
        .route(
            &Query::new("leak check")
                .with_strategy(StrategyKind::Parallel)
                .with_deadline(Duration::from_millis(200)),
        )
        .await
        .expect("web answers");
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(result
        .providers
        .iter()
        .any(|r| r.provider == "hanging" && r.outcome.is_timeout()));

    // Caller abandons the request mid-flight.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        router.route(&Query::new("abandoned request").with_strategy(StrategyKind::Parallel)),
    )
    .await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(released.load(Ordering::SeqCst), 2);
}
