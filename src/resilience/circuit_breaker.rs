//! Per-backend circuit breaker registry.
//!
//! Each backend key has its own consecutive-failure counter and open-until
//! deadline. There is no background timer: an open circuit closes lazily the
//! first time it is inspected after its cooldown has elapsed.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are allowed.
    Closed,
    /// Calls are rejected without touching the network.
    Open,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open once tripped.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the cooldown.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Point-in-time view of one backend's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures recorded.
    pub consecutive_failures: u32,
    /// Remaining cooldown when open.
    pub retry_in: Option<Duration>,
}

/// Shared circuit state keyed by backend.
///
/// Implementations must tolerate concurrent callers. A distributed store can
/// stand in for [`InMemoryCircuitRegistry`] without touching call sites.
pub trait CircuitBreakerRegistry: Send + Sync + Debug {
    /// Returns the current view of a backend's circuit.
    fn snapshot(&self, key: &str) -> CircuitSnapshot;

    /// Records a successful call; always resets the circuit.
    fn record_success(&self, key: &str);

    /// Records a failed call.
    fn record_failure(&self, key: &str);

    /// Returns true if calls to this backend must be rejected.
    fn is_open(&self, key: &str) -> bool {
        self.snapshot(key).state == CircuitState::Open
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CircuitEntry {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Process-local registry. State lives as long as the registry does.
#[derive(Debug, Default)]
pub struct InMemoryCircuitRegistry {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, CircuitEntry>>,
}

impl InMemoryCircuitRegistry {
    /// Creates a registry with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    // A panic while holding the lock cannot leave an entry half-written,
    // so a poisoned map is still usable.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, CircuitEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CircuitBreakerRegistry for InMemoryCircuitRegistry {
    fn snapshot(&self, key: &str) -> CircuitSnapshot {
        let now = Instant::now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                retry_in: None,
            };
        };

        match entry.open_until {
            Some(until) if now < until => CircuitSnapshot {
                state: CircuitState::Open,
                consecutive_failures: entry.consecutive_failures,
                retry_in: Some(until - now),
            },
            Some(_) => {
                // Cooldown over. The counter is kept, so the next failure
                // re-opens immediately while a success resets it.
                tracing::info!(backend = key, "Circuit breaker closing after cooldown");
                entry.open_until = None;
                CircuitSnapshot {
                    state: CircuitState::Closed,
                    consecutive_failures: entry.consecutive_failures,
                    retry_in: None,
                }
            }
            None => CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: entry.consecutive_failures,
                retry_in: None,
            },
        }
    }

    fn record_success(&self, key: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            *entry = CircuitEntry::default();
        }
    }

    fn record_failure(&self, key: &str) {
        let now = Instant::now();
        let mut entries = self.entries();
        let entry = entries.entry(key.to_string()).or_default();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

        let already_open = entry.open_until.is_some_and(|until| now < until);
        if !already_open && entry.consecutive_failures >= self.config.failure_threshold {
            tracing::warn!(
                backend = key,
                failures = entry.consecutive_failures,
                threshold = self.config.failure_threshold,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opening"
            );
            entry.open_until = Some(now + self.config.cooldown);
        }
    }
}
