//! Privacy budget: serialized epsilon accounting
//!
//! The budget is the only mutable state of the differential-privacy layer.
//! All mutation goes through one mutex, so `0 <= remaining <= total` holds
//! at every observation point under arbitrary concurrent interleaving.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::BudgetError;

/// Share of the nominal request granted to low-priority callers under the
/// adaptive strategy. High priority receives the full request, so for equal
/// requests high >= low always holds.
pub const ADAPTIVE_LOW_SHARE: f64 = 0.5;

/// Bounded reset history length
const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// Grant exactly the requested epsilon if available
    Uniform,
    /// Weight grants by priority: high gets the full request, low gets
    /// [`ADAPTIVE_LOW_SHARE`] of it
    Adaptive,
}

/// A granted slice of the budget. Move-only: consumed by value exactly
/// once, never cloned, never reused.
#[derive(Debug)]
pub struct EpsilonGrant {
    epsilon: f64,
    priority: Priority,
}

impl EpsilonGrant {
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

/// One recorded budget reset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResetEvent {
    /// Unix seconds at which the reset took effect
    pub at_unix: u64,
    /// Epsilon consumed in the interval that just ended
    pub consumed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BudgetState {
    total: f64,
    remaining: f64,
    reset_interval_secs: u64,
    last_reset_unix: u64,
    history: Vec<ResetEvent>,
    /// Epsilons granted since the last reset, in grant order
    ledger: Vec<f64>,
}

/// The privacy budget. Owned by the `PrivacyEngine`; exposed to other
/// components only through the atomic request/observe operations here.
#[derive(Debug)]
pub struct PrivacyBudget {
    inner: Mutex<BudgetState>,
}

impl PrivacyBudget {
    pub fn new(total_epsilon: f64, reset_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(BudgetState {
                total: total_epsilon,
                remaining: total_epsilon,
                reset_interval_secs: reset_interval.as_secs(),
                last_reset_unix: now_unix(),
                history: Vec::new(),
                ledger: Vec::new(),
            }),
        }
    }

    /// Replace the total budget. Remaining is clamped into the new bounds;
    /// it never exceeds the new total.
    pub fn set_total(&self, total_epsilon: f64) {
        let mut state = self.inner.lock().expect("budget mutex poisoned");
        state.total = total_epsilon;
        state.remaining = state.remaining.min(total_epsilon);
    }

    /// Request an epsilon allocation using the wall clock.
    pub fn request(
        &self,
        requested: f64,
        priority: Priority,
        strategy: AllocationStrategy,
    ) -> Result<EpsilonGrant, BudgetError> {
        self.request_at(requested, priority, strategy, now_unix())
    }

    /// Request an epsilon allocation at an explicit instant (unix seconds).
    /// The lazy auto-reset happens here: if the interval elapsed, remaining
    /// is restored to total and a `ResetEvent` recorded before the grant is
    /// considered.
    pub fn request_at(
        &self,
        requested: f64,
        priority: Priority,
        strategy: AllocationStrategy,
        now_unix: u64,
    ) -> Result<EpsilonGrant, BudgetError> {
        if !requested.is_finite() || requested <= 0.0 {
            return Err(BudgetError::InvalidRequest(requested));
        }

        let mut state = self.inner.lock().expect("budget mutex poisoned");
        state.maybe_reset(now_unix);

        let granted = match (strategy, priority) {
            (AllocationStrategy::Uniform, _) => requested,
            (AllocationStrategy::Adaptive, Priority::High) => requested,
            (AllocationStrategy::Adaptive, Priority::Low) => requested * ADAPTIVE_LOW_SHARE,
        };

        // Strict comparison up to f64 noise. Repeated subtraction drifts
        // by more than one ulp, so the tolerance scales with the budget;
        // a grant may consume the exact remainder but never push
        // remaining meaningfully negative.
        if granted > state.remaining + state.total * 1e-12 {
            return Err(BudgetError::Exhausted {
                requested: granted,
                remaining: state.remaining,
            });
        }

        state.remaining = (state.remaining - granted).max(0.0);
        state.ledger.push(granted);
        Ok(EpsilonGrant {
            epsilon: granted,
            priority,
        })
    }

    pub fn remaining(&self) -> f64 {
        self.inner.lock().expect("budget mutex poisoned").remaining
    }

    pub fn total(&self) -> f64 {
        self.inner.lock().expect("budget mutex poisoned").total
    }

    /// Sum of epsilons granted since the last reset
    pub fn consumed(&self) -> f64 {
        let state = self.inner.lock().expect("budget mutex poisoned");
        state.ledger.iter().sum()
    }

    /// Granted epsilons since the last reset, in grant order
    pub fn ledger(&self) -> Vec<f64> {
        self.inner.lock().expect("budget mutex poisoned").ledger.clone()
    }

    pub fn history(&self) -> Vec<ResetEvent> {
        self.inner.lock().expect("budget mutex poisoned").history.clone()
    }

    /// Persist budget state as JSON (temp file + rename)
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let state = self.inner.lock().expect("budget mutex poisoned").clone();
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }

    /// Restore budget state from JSON. Round-trips exactly: total,
    /// remaining, interval, history, and ledger all survive a restart.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let state: BudgetState = serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self {
            inner: Mutex::new(state),
        })
    }
}

impl BudgetState {
    fn maybe_reset(&mut self, now_unix: u64) {
        if self.reset_interval_secs == 0 {
            return;
        }
        if now_unix.saturating_sub(self.last_reset_unix) >= self.reset_interval_secs {
            let consumed: f64 = self.ledger.iter().sum();
            self.history.push(ResetEvent {
                at_unix: now_unix,
                consumed,
            });
            if self.history.len() > HISTORY_LIMIT {
                let excess = self.history.len() - HISTORY_LIMIT;
                self.history.drain(..excess);
            }
            self.remaining = self.total;
            self.ledger.clear();
            self.last_reset_unix = now_unix;
            tracing::info!(consumed, total = self.total, "privacy budget reset");
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(budget: &PrivacyBudget, eps: f64) -> Result<EpsilonGrant, BudgetError> {
        budget.request(eps, Priority::High, AllocationStrategy::Uniform)
    }

    #[test]
    fn test_exact_exhaustion() {
        let budget = PrivacyBudget::new(1.0, Duration::from_secs(3600));
        for _ in 0..10 {
            assert!(grant(&budget, 0.1).is_ok());
        }
        assert!(matches!(
            grant(&budget, 0.1),
            Err(BudgetError::Exhausted { .. })
        ));
        assert!(budget.remaining().abs() < 1e-9);
    }

    #[test]
    fn test_drifted_remainder_still_grantable() {
        // 0.05 has no exact binary representation, so twenty subtractions
        // drift the remainder below the request by more than one ulp.
        // The tolerance scales with the budget and admits the last grant.
        let budget = PrivacyBudget::new(1.0, Duration::from_secs(3600));
        for i in 0..20 {
            assert!(grant(&budget, 0.05).is_ok(), "grant {} denied", i);
        }
        assert!(matches!(
            grant(&budget, 0.05),
            Err(BudgetError::Exhausted { .. })
        ));
    }

    #[test]
    fn test_remaining_never_negative() {
        let budget = PrivacyBudget::new(0.5, Duration::from_secs(3600));
        let _ = grant(&budget, 0.4);
        assert!(grant(&budget, 0.2).is_err());
        assert!(budget.remaining() >= 0.0);
    }

    #[test]
    fn test_adaptive_high_at_least_low() {
        let budget = PrivacyBudget::new(10.0, Duration::from_secs(3600));
        let high = budget
            .request(0.4, Priority::High, AllocationStrategy::Adaptive)
            .unwrap();
        let low = budget
            .request(0.4, Priority::Low, AllocationStrategy::Adaptive)
            .unwrap();
        assert!(high.epsilon() >= low.epsilon());
        assert!((low.epsilon() - 0.4 * ADAPTIVE_LOW_SHARE).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_request_rejected() {
        let budget = PrivacyBudget::new(1.0, Duration::from_secs(3600));
        assert!(matches!(
            grant(&budget, -0.1),
            Err(BudgetError::InvalidRequest(_))
        ));
        assert!(grant(&budget, f64::NAN).is_err());
    }

    #[test]
    fn test_auto_reset_records_history() {
        let budget = PrivacyBudget::new(1.0, Duration::from_secs(60));
        let t0 = now_unix();
        budget
            .request_at(0.8, Priority::High, AllocationStrategy::Uniform, t0)
            .unwrap();
        assert!(budget.remaining() < 0.3);

        // Past the interval the budget restores itself before granting.
        budget
            .request_at(0.9, Priority::High, AllocationStrategy::Uniform, t0 + 61)
            .unwrap();
        let history = budget.history();
        assert_eq!(history.len(), 1);
        assert!((history[0].consumed - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_ledger_tracks_consumed() {
        let budget = PrivacyBudget::new(1.0, Duration::from_secs(3600));
        grant(&budget, 0.2).unwrap();
        grant(&budget, 0.3).unwrap();
        assert!((budget.consumed() - 0.5).abs() < 1e-12);
        assert_eq!(budget.ledger().len(), 2);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budget.json");
        let budget = PrivacyBudget::new(2.0, Duration::from_secs(3600));
        grant(&budget, 0.25).unwrap();
        budget.save(&path).unwrap();

        let restored = PrivacyBudget::load(&path).unwrap();
        assert_eq!(restored.total(), 2.0);
        assert!((restored.remaining() - 1.75).abs() < 1e-12);
        assert_eq!(restored.ledger(), budget.ledger());
    }

    #[test]
    fn test_set_total_clamps_remaining() {
        let budget = PrivacyBudget::new(2.0, Duration::from_secs(3600));
        budget.set_total(0.5);
        assert!(budget.remaining() <= 0.5);
    }
}
