//! Per-provider circuit breaker.
//!
//! Tracks consecutive failures per provider and temporarily removes
//! providers that fail repeatedly. After a cooldown, a tripped provider
//! enters a half-open state where exactly one trial call decides whether
//! to restore or re-trip the circuit. Each re-trip grows the cooldown.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  cooldown   ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └───▲────┘             └────┬─────┘
//!     │                        │  trial failure         │
//!     │                        └───────────────────────┤
//!     │  trial success                                  │
//!     └─────────────────────────────────────────────────┘
//! ```
//!
//! Time is read from [`tokio::time::Instant`] so paused-clock tests can
//! step through cooldowns.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Circuit state for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy; calls proceed.
    Closed,
    /// Tripped; calls are blocked until the cooldown expires.
    Open,
    /// Cooldown elapsed; one trial call is allowed.
    HalfOpen,
}

/// Result of asking the breaker for permission to call a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Circuit closed; call normally.
    Allowed,
    /// This caller holds the single half-open trial.
    Trial,
    /// Circuit open (or the trial is already taken).
    Rejected,
}

impl CircuitDecision {
    pub fn is_permitted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Configuration for circuit breaker behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before tripping to Open.
    pub failure_threshold: u32,
    /// Failures further apart than this do not accumulate.
    pub failure_window_secs: u64,
    /// Initial Open-state cooldown.
    pub cooldown_ms: u64,
    /// Cooldown growth factor applied on each re-trip from HalfOpen.
    pub backoff_multiplier: f64,
    /// Upper bound on the grown cooldown.
    pub max_cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_secs: 60,
            cooldown_ms: 30_000,
            backoff_multiplier: 2.0,
            max_cooldown_ms: 600_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be greater than 0".into());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("circuit_breaker.backoff_multiplier must be >= 1.0".into());
        }
        if self.cooldown_ms > self.max_cooldown_ms {
            return Err("circuit_breaker.cooldown_ms must be <= max_cooldown_ms".into());
        }
        Ok(())
    }
}

/// Health tracking data for a single provider.
#[derive(Debug, Clone)]
struct ProviderCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    /// When the Open state may move to HalfOpen.
    open_until: Option<Instant>,
    /// Cooldown that will apply to the next trip.
    cooldown: Duration,
    /// When the half-open trial was handed out, if one is in flight.
    trial_started_at: Option<Instant>,
}

impl ProviderCircuit {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            last_success_at: None,
            open_until: None,
            cooldown,
            trial_started_at: None,
        }
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.open_until.is_none_or(|until| now >= until)
    }

    /// A trial whose caller vanished without reporting back is reclaimed
    /// after one cooldown so the provider cannot wedge in HalfOpen.
    fn trial_in_flight(&self, now: Instant) -> bool {
        self.trial_started_at
            .is_some_and(|started| now.duration_since(started) < self.cooldown.max(Duration::from_secs(1)))
    }
}

/// Point-in-time view of one provider's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time left before an Open circuit admits a trial.
    #[serde(with = "crate::types::duration_ms")]
    pub cooldown_remaining: Duration,
}

/// Per-provider circuit breaker shared by all in-flight queries.
///
/// Every transition happens under one lock, so concurrent outcomes for
/// the same provider never lose updates.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, ProviderCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn circuits(&self) -> MutexGuard<'_, HashMap<String, ProviderCircuit>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to call `provider` right now.
    ///
    /// - Closed: [`CircuitDecision::Allowed`]
    /// - Open with cooldown elapsed: moves to HalfOpen and hands out the trial
    /// - HalfOpen with no trial in flight: hands out the trial
    /// - otherwise: [`CircuitDecision::Rejected`]
    pub fn try_acquire(&self, provider: &str) -> CircuitDecision {
        let now = Instant::now();
        let mut circuits = self.circuits();
        let circuit = circuits
            .entry(provider.to_owned())
            .or_insert_with(|| ProviderCircuit::new(self.config.cooldown()));

        match circuit.state {
            CircuitState::Closed => CircuitDecision::Allowed,
            CircuitState::Open if circuit.cooldown_elapsed(now) => {
                circuit.state = CircuitState::HalfOpen;
                circuit.trial_started_at = Some(now);
                tracing::debug!(provider, "circuit half-open, trial call granted");
                CircuitDecision::Trial
            }
            CircuitState::Open => CircuitDecision::Rejected,
            CircuitState::HalfOpen if circuit.trial_in_flight(now) => CircuitDecision::Rejected,
            CircuitState::HalfOpen => {
                circuit.trial_started_at = Some(now);
                CircuitDecision::Trial
            }
        }
    }

    /// Whether `provider` would be rejected right now. Does not claim the trial.
    pub fn is_blocked(&self, provider: &str) -> bool {
        let now = Instant::now();
        self.circuits().get(provider).is_some_and(|c| match c.state {
            CircuitState::Closed => false,
            CircuitState::Open => !c.cooldown_elapsed(now),
            CircuitState::HalfOpen => c.trial_in_flight(now),
        })
    }

    /// Record a successful call. Closes the circuit and clears the failure count.
    pub fn record_success(&self, provider: &str) -> CircuitState {
        let now = Instant::now();
        let mut circuits = self.circuits();
        let circuit = circuits
            .entry(provider.to_owned())
            .or_insert_with(|| ProviderCircuit::new(self.config.cooldown()));

        if circuit.state != CircuitState::Closed {
            tracing::info!(provider, "circuit closed after successful trial");
        }
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.last_success_at = Some(now);
        circuit.open_until = None;
        circuit.trial_started_at = None;
        circuit.cooldown = self.config.cooldown();
        circuit.state
    }

    /// Record a failed call (errors and timeouts alike).
    pub fn record_failure(&self, provider: &str) -> CircuitState {
        let now = Instant::now();
        let mut circuits = self.circuits();
        let circuit = circuits
            .entry(provider.to_owned())
            .or_insert_with(|| ProviderCircuit::new(self.config.cooldown()));

        let within_window = circuit
            .last_failure_at
            .is_some_and(|t| now.duration_since(t) <= self.config.failure_window());
        circuit.consecutive_failures = if within_window || circuit.state != CircuitState::Closed {
            circuit.consecutive_failures.saturating_add(1)
        } else {
            1
        };
        circuit.last_failure_at = Some(now);

        match circuit.state {
            CircuitState::HalfOpen => {
                let grown = circuit.cooldown.mul_f64(self.config.backoff_multiplier);
                circuit.cooldown = grown.min(self.config.max_cooldown());
                circuit.state = CircuitState::Open;
                circuit.open_until = Some(now + circuit.cooldown);
                circuit.trial_started_at = None;
                tracing::warn!(
                    provider,
                    cooldown_ms = circuit.cooldown.as_millis() as u64,
                    "trial call failed, circuit re-opened"
                );
            }
            CircuitState::Closed if circuit.consecutive_failures >= self.config.failure_threshold => {
                circuit.state = CircuitState::Open;
                circuit.open_until = Some(now + circuit.cooldown);
                tracing::warn!(
                    provider,
                    failures = circuit.consecutive_failures,
                    "circuit opened"
                );
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
        circuit.state
    }

    /// Current circuit state for a provider (Closed if never seen).
    pub fn state(&self, provider: &str) -> CircuitState {
        self.circuits()
            .get(provider)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    pub fn snapshot(&self, provider: &str) -> CircuitSnapshot {
        let now = Instant::now();
        self.circuits().get(provider).map_or(
            CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                cooldown_remaining: Duration::ZERO,
            },
            |c| CircuitSnapshot {
                state: c.state,
                consecutive_failures: c.consecutive_failures,
                cooldown_remaining: match (c.state, c.open_until) {
                    (CircuitState::Open, Some(until)) => until.saturating_duration_since(now),
                    _ => Duration::ZERO,
                },
            },
        )
    }

    /// Snapshot of every provider the breaker has seen.
    pub fn health_report(&self) -> Vec<(String, CircuitSnapshot)> {
        let ids: Vec<String> = self.circuits().keys().cloned().collect();
        let mut report: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let snapshot = self.snapshot(&id);
                (id, snapshot)
            })
            .collect();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Administrative reset of one provider to Closed.
    pub fn reset(&self, provider: &str) {
        self.circuits().remove(provider);
    }

    /// Administrative reset of every provider.
    pub fn reset_all(&self) {
        self.circuits().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
