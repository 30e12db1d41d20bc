// SPDX-License-Identifier: MIT

//! Core graph types: node identifiers, routes and run outcomes

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::hash::Hash;

use crate::adk::error::FailureKind;
use crate::kinetic::workflow::state::WorkflowState;

/// Identifier for a node in a graph.
///
/// Implemented automatically for any small closed enum that is `Copy`,
/// hashable and printable, so callers just derive the traits on their own
/// enum of steps.
pub trait NodeId: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> NodeId for T where T: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Where execution goes after a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route<N> {
    /// Continue with another node
    To(N),
    /// Terminal sentinel
    End,
}

impl<N: NodeId> Route<N> {
    pub fn is_end(&self) -> bool {
        matches!(self, Route::End)
    }

    pub fn node(&self) -> Option<N> {
        match self {
            Route::To(id) => Some(*id),
            Route::End => None,
        }
    }
}

impl<N: NodeId> From<N> for Route<N> {
    fn from(id: N) -> Self {
        Route::To(id)
    }
}

impl<N: NodeId> fmt::Display for Route<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::To(id) => write!(f, "{}", id),
            Route::End => write!(f, "END"),
        }
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// A route reached `Route::End`
    Completed,
    /// The per-run step ceiling was hit
    IterationLimit,
    /// A router returned a target outside its declared set
    InvalidRoute,
    /// The cancellation token fired between steps
    Cancelled,
}

impl TerminationReason {
    /// Whether the run ended through the degraded path
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            TerminationReason::IterationLimit | TerminationReason::InvalidRoute
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Completed => write!(f, "completed"),
            TerminationReason::IterationLimit => write!(f, "iteration_limit"),
            TerminationReason::InvalidRoute => write!(f, "invalid_route"),
            TerminationReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of `GraphExecutor::run`
#[derive(Debug, Clone)]
pub struct RunOutcome<N> {
    /// Final merged state
    pub state: WorkflowState,
    pub reason: TerminationReason,
    /// Steps executed in this run
    pub steps: usize,
    /// Cumulative step counter across every run of the session
    pub iteration: u64,
    /// Last node that executed, if any
    pub last_node: Option<N>,
}

/// Reason a workflow took its degraded path.
///
/// Recorded as a string in the graph's fallback-reason field so routers can
/// branch on a single value whatever triggered the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTrigger {
    /// A classifier was not confident enough to act
    LowConfidence,
    /// A circuit breaker rejected the call
    CircuitOpen,
    /// A retry policy gave up on a transient failure
    RetriesExhausted,
    /// The run hit its step ceiling
    IterationLimit,
    /// A router picked an undeclared successor
    InvalidRoute,
}

impl FallbackTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackTrigger::LowConfidence => "low_confidence",
            FallbackTrigger::CircuitOpen => "circuit_open",
            FallbackTrigger::RetriesExhausted => "retries_exhausted",
            FallbackTrigger::IterationLimit => "iteration_limit",
            FallbackTrigger::InvalidRoute => "invalid_route",
        }
    }

    /// Trigger for a failed resource call, `None` for fatal failures
    pub fn from_failure(kind: FailureKind) -> Option<Self> {
        match kind {
            FailureKind::CircuitOpen => Some(FallbackTrigger::CircuitOpen),
            FailureKind::Transient => Some(FallbackTrigger::RetriesExhausted),
            FailureKind::Fatal => None,
        }
    }
}

impl fmt::Display for FallbackTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
