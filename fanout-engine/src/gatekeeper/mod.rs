//! Provider admission control: rate limits, budgets, and concurrency.
//!
//! [`Gatekeeper::admit`] is consulted before every dispatch. It reserves
//! one call against the provider's fixed rate windows and its estimated
//! cost against the budget ledger, and hands out an [`AdmissionPermit`]
//! holding a concurrency slot. The strategy commits the permit when it
//! actually invokes the provider; a permit dropped uncommitted (for
//! example a cascade candidate that was never reached) refunds its
//! reservation.
//!
//! Denials never touch the circuit breaker: a denied provider is only
//! excluded from the current dispatch.

mod clock;
mod ledger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{BudgetStatus, RateStatus, SpendUsage, WindowUsage};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::DenialReason;

use ledger::{Ledger, WindowIds};

/// Quotas, budgets, and concurrency cap for one provider.
///
/// `None` means unlimited for that window or tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderLimits {
    pub per_minute: Option<u32>,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
    /// Largest estimated cost a single call may have (USD).
    pub max_cost_per_query: Option<f64>,
    pub daily_budget: Option<f64>,
    pub monthly_budget: Option<f64>,
    /// Maximum in-flight calls.
    pub max_concurrency: usize,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            per_minute: None,
            per_hour: None,
            per_day: None,
            max_cost_per_query: None,
            daily_budget: None,
            monthly_budget: None,
            max_concurrency: 8,
        }
    }
}

impl ProviderLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("limits.max_concurrency must be greater than 0".into());
        }
        let budgets = [
            ("max_cost_per_query", self.max_cost_per_query),
            ("daily_budget", self.daily_budget),
            ("monthly_budget", self.monthly_budget),
        ];
        for (name, value) in budgets {
            if value.is_some_and(|v| v < 0.0 || !v.is_finite()) {
                return Err(format!("limits.{name} must be a non-negative number"));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ProviderGate {
    limits: ProviderLimits,
    ledger: Mutex<Ledger>,
    slots: Arc<Semaphore>,
}

impl ProviderGate {
    fn new(limits: ProviderLimits) -> Self {
        let slots = Arc::new(Semaphore::new(limits.max_concurrency));
        Self {
            limits,
            ledger: Mutex::new(Ledger::default()),
            slots,
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of admission for one provider call.
///
/// Holds a concurrency slot until dropped.
pub struct AdmissionPermit {
    provider: String,
    estimated_cost: f64,
    windows: WindowIds,
    gate: Arc<ProviderGate>,
    committed: bool,
    _slot: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn estimated_cost(&self) -> f64 {
        self.estimated_cost
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Mark the reservation as used. Call right before invoking the provider.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    /// Replace the estimated cost with the real one once the call is done.
    pub fn settle(&mut self, actual_cost: f64) {
        if !self.committed {
            return;
        }
        let delta = actual_cost - self.estimated_cost;
        if delta.abs() > f64::EPSILON {
            self.gate.ledger().settle(self.windows, delta);
            self.estimated_cost = actual_cost;
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if !self.committed {
            self.gate.ledger().refund(self.windows, self.estimated_cost);
        }
    }
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("provider", &self.provider)
            .field("estimated_cost", &self.estimated_cost)
            .field("committed", &self.committed)
            .finish()
    }
}

/// Live admission status for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStatus {
    pub rate: RateStatus,
    pub budget: BudgetStatus,
    pub in_flight: usize,
    pub max_concurrency: usize,
}

/// Per-provider admission control shared across in-flight queries.
pub struct Gatekeeper {
    clock: Arc<dyn Clock>,
    default_limits: ProviderLimits,
    gates: RwLock<HashMap<String, Arc<ProviderGate>>>,
}

impl Gatekeeper {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_default_limits(clock, ProviderLimits::default())
    }

    /// Providers never given explicit limits use `default_limits`.
    pub fn with_default_limits(clock: Arc<dyn Clock>, default_limits: ProviderLimits) -> Self {
        Self {
            clock,
            default_limits,
            gates: RwLock::new(HashMap::new()),
        }
    }

    /// Set limits for a provider. Resets its counters.
    pub fn set_limits(&self, provider: &str, limits: ProviderLimits) {
        self.gates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.to_owned(), Arc::new(ProviderGate::new(limits)));
    }

    pub fn limits(&self, provider: &str) -> ProviderLimits {
        self.gate(provider).limits.clone()
    }

    fn gate(&self, provider: &str) -> Arc<ProviderGate> {
        if let Some(gate) = self
            .gates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
        {
            return Arc::clone(gate);
        }
        let mut gates = self.gates.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            gates
                .entry(provider.to_owned())
                .or_insert_with(|| Arc::new(ProviderGate::new(self.default_limits.clone()))),
        )
    }

    /// Admit one call to `provider` with the given estimated cost.
    ///
    /// # Errors
    ///
    /// Returns the [`DenialReason`] for the first limit that would be breached.
    pub fn admit(&self, provider: &str, estimated_cost: f64) -> Result<AdmissionPermit, DenialReason> {
        let gate = self.gate(provider);
        let slot = Arc::clone(&gate.slots)
            .try_acquire_owned()
            .map_err(|_| DenialReason::ConcurrencyLimited)?;

        let windows = WindowIds::at(self.clock.now());
        {
            let mut ledger = gate.ledger();
            ledger.check(&gate.limits, windows, estimated_cost)?;
            ledger.reserve(windows, estimated_cost);
        }

        Ok(AdmissionPermit {
            provider: provider.to_owned(),
            estimated_cost,
            windows,
            gate,
            committed: false,
            _slot: slot,
        })
    }

    pub fn status(&self, provider: &str) -> GateStatus {
        let gate = self.gate(provider);
        let now = self.clock.now();
        let ledger = gate.ledger();
        GateStatus {
            rate: ledger.rate_status(&gate.limits, now),
            budget: ledger.budget_status(&gate.limits, now),
            in_flight: gate.limits.max_concurrency - gate.slots.available_permits(),
            max_concurrency: gate.limits.max_concurrency,
        }
    }
}

impl fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("clock", &self.clock)
            .field("default_limits", &self.default_limits)
            .finish_non_exhaustive()
    }
}
