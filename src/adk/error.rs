// SPDX-License-Identifier: MIT

//! Typed error handling for kinetic-graph
//!
//! Errors fall into three layers:
//! - `ResourceError` / `NodeFailure` - outcomes of unreliable external calls,
//!   recorded into workflow state rather than aborting a run
//! - `GraphError` - configuration errors raised while compiling a graph, plus
//!   storage failures surfaced at run time
//! - `KineticError` - top-level error for the binary and config loading

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying (timeouts, connection resets, 5xx)
    Transient,
    /// Retrying will not help (bad arguments, not found, auth)
    Fatal,
    /// Rejected by an open circuit breaker without calling the resource
    CircuitOpen,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Fatal => write!(f, "fatal"),
            FailureKind::CircuitOpen => write!(f, "circuit_open"),
        }
    }
}

/// Error returned by a tool or other external resource call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResourceError {
    #[error("transient failure from {resource}: {message}")]
    Transient { resource: String, message: String },

    #[error("fatal failure from {resource}: {message}")]
    Fatal { resource: String, message: String },

    #[error("circuit open for {resource}, retry in {}s", .retry_in.as_secs())]
    CircuitOpen { resource: String, retry_in: Duration },
}

impl ResourceError {
    /// Create a transient error
    pub fn transient(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a fatal error
    pub fn fatal(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Classification used by retry and routing decisions
    pub fn kind(&self) -> FailureKind {
        match self {
            ResourceError::Transient { .. } => FailureKind::Transient,
            ResourceError::Fatal { .. } => FailureKind::Fatal,
            ResourceError::CircuitOpen { .. } => FailureKind::CircuitOpen,
        }
    }

    /// Whether a retry policy may attempt the call again
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResourceError::Transient { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        self.kind() == FailureKind::CircuitOpen
    }
}

/// Failure returned by a node's computation
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind}: {message}")]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl NodeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, message)
    }
}

impl From<ResourceError> for NodeFailure {
    fn from(err: ResourceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Persistence errors from a checkpoint store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialize checkpoint: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("checkpoint store lock poisoned")]
    Poisoned,
}

/// Graph construction and execution errors.
///
/// Most variants are raised by `GraphBuilder::compile`, before any session
/// runs. At run time only `Store` and rejected writes (`UndeclaredField`,
/// `TypeMismatch`) occur.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node writes, or the executor is configured to write, a field the
    /// schema does not declare
    #[error("field '{field}' written by '{writer}' has no declared merge rule")]
    UndeclaredField { field: String, writer: String },

    /// A write whose value does not fit the field's declared type
    #[error("field '{field}' written by '{writer}' expects {expected}")]
    TypeMismatch {
        field: String,
        expected: String,
        writer: String,
    },

    /// An edge or router names a node that was never added
    #[error("'{from}' routes to unknown node '{to}'")]
    UnknownNode { from: String, to: String },

    #[error("no entry node set")]
    MissingEntry,

    /// A node has no outgoing edge
    #[error("node '{0}' has no outgoing edge")]
    MissingEdge(String),

    #[error("node '{0}' added twice")]
    DuplicateNode(String),

    #[error("node '{0}' already has an outgoing edge")]
    DuplicateEdge(String),

    #[error("router for '{node}' declares no successors")]
    EmptyRouter { node: String },

    #[error("invalid condition '{expr}': {message}")]
    InvalidCondition { expr: String, message: String },

    #[error("invalid state schema: {0}")]
    InvalidSchema(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level error type for kinetic-graph
#[derive(Debug, Error)]
pub enum KineticError {
    /// Configuration errors (bad file, invalid values, bad env overrides)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl KineticError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
