// SPDX-License-Identifier: MIT

//! Resilience primitives wrapped around unreliable external calls
//!
//! This module provides:
//! - `CircuitBreakerRegistry` - per-resource three-state breakers
//! - `RetryPolicy` - bounded attempts with exponential backoff
//! - `Clock` / `Sleeper` - time sources, swappable in tests
//!
//! Node implementations compose these themselves; the graph executor never
//! calls them directly.

mod circuit_breaker;
mod clock;
mod retry;

pub use circuit_breaker::{
    BreakerStatus, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ResourceKey,
};
pub use clock::{Clock, ManualClock, Sleeper, SystemClock, TokioSleeper};
pub use retry::RetryPolicy;
