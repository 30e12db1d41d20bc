// SPDX-License-Identifier: MIT

//! Circuit breaker registry
//!
//! One breaker per resource key, created lazily on first use:
//!
//! ```text
//! CLOSED --(threshold consecutive failures)--> OPEN
//! OPEN   --(timeout elapsed, next call)------> HALF_OPEN (one trial call)
//! HALF_OPEN --success--> CLOSED
//! HALF_OPEN --failure--> OPEN
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::clock::{Clock, SystemClock};
use crate::adk::error::ResourceError;

/// Identifier of an external resource guarded by a breaker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Breaker state for a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Thresholds shared by every breaker in a registry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of one breaker, for status reporting
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerStatus {
    pub key: ResourceKey,
    pub state: CircuitState,
    pub failures: u32,
    /// Time since the last recorded failure
    pub since_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerRecord {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

/// Shared, cloneable registry of circuit breakers keyed by resource.
///
/// Clones share the same breaker map, so one registry handle can be given to
/// every node (and every session) that touches the same resources.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    records: Arc<Mutex<HashMap<ResourceKey, BreakerRecord>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker for `key`.
    ///
    /// While the circuit is open the operation is not invoked and
    /// `ResourceError::CircuitOpen` is returned.
    pub async fn call<T, F, Fut>(&self, key: &ResourceKey, operation: F) -> Result<T, ResourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResourceError>>,
    {
        let is_trial = self.acquire(key)?;
        let mut guard = TrialGuard {
            registry: self,
            key,
            armed: is_trial,
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record_success(key),
            Err(e) => self.record_failure(key, e),
        }
        result
    }

    /// Current state for `key` (`Closed` if the key was never used)
    pub fn state(&self, key: &ResourceKey) -> CircuitState {
        self.lock()
            .get(key)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failure count for `key`
    pub fn failures(&self, key: &ResourceKey) -> u32 {
        self.lock().get(key).map(|r| r.failures).unwrap_or(0)
    }

    /// Status of every breaker that has been used, sorted by key
    pub fn snapshot(&self) -> Vec<BreakerStatus> {
        let now = self.clock.now();
        let mut statuses: Vec<BreakerStatus> = self
            .lock()
            .iter()
            .map(|(key, record)| BreakerStatus {
                key: key.clone(),
                state: record.state,
                failures: record.failures,
                since_failure: record.last_failure.map(|t| now.saturating_duration_since(t)),
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Force a breaker back to `Closed`
    pub fn reset(&self, key: &ResourceKey) {
        if self.lock().remove(key).is_some() {
            log::info!("Circuit for {} reset", key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceKey, BreakerRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a call may proceed. Returns `true` for a half-open trial.
    fn acquire(&self, key: &ResourceKey) -> Result<bool, ResourceError> {
        let now = self.clock.now();
        let mut records = self.lock();
        let record = records.entry(key.clone()).or_insert_with(BreakerRecord::new);

        match record.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed = record
                    .last_failure
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed > self.config.timeout {
                    log::info!("Circuit HALF_OPEN for {} - attempting recovery", key);
                    record.state = CircuitState::HalfOpen;
                    record.trial_in_flight = true;
                    Ok(true)
                } else {
                    Err(ResourceError::CircuitOpen {
                        resource: key.to_string(),
                        retry_in: self.config.timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if record.trial_in_flight {
                    Err(ResourceError::CircuitOpen {
                        resource: key.to_string(),
                        retry_in: Duration::ZERO,
                    })
                } else {
                    record.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self, key: &ResourceKey) {
        let mut records = self.lock();
        let record = records.entry(key.clone()).or_insert_with(BreakerRecord::new);
        if record.state == CircuitState::HalfOpen {
            log::info!("Circuit CLOSED for {} - service recovered", key);
        }
        record.state = CircuitState::Closed;
        record.failures = 0;
        record.trial_in_flight = false;
    }

    fn record_failure(&self, key: &ResourceKey, error: &ResourceError) {
        let now = self.clock.now();
        let mut records = self.lock();
        let record = records.entry(key.clone()).or_insert_with(BreakerRecord::new);

        record.failures = record.failures.saturating_add(1);
        record.last_failure = Some(now);
        record.trial_in_flight = false;
        log::warn!("Failure #{} for {}: {}", record.failures, key, error);

        match record.state {
            CircuitState::HalfOpen => {
                log::warn!("Circuit OPEN for {} - trial call failed", key);
                record.state = CircuitState::Open;
            }
            CircuitState::Closed if record.failures >= self.config.failure_threshold => {
                log::error!("Circuit OPEN for {} - too many failures", key);
                record.state = CircuitState::Open;
            }
            _ => {}
        }
    }
}

/// Returns an abandoned half-open trial to `Open` so the next caller can retry
struct TrialGuard<'a> {
    registry: &'a CircuitBreakerRegistry,
    key: &'a ResourceKey,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut records = self.registry.lock();
            if let Some(record) = records.get_mut(self.key) {
                record.trial_in_flight = false;
                record.state = CircuitState::Open;
            }
        }
    }
}
