// SPDX-License-Identifier: MIT

//! Graph-based workflow execution
//!
//! A graph is a set of nodes keyed by a caller-defined `NodeId` enum, one
//! outgoing edge per node, and an entry node. Cycles are allowed; the
//! executor bounds every run with an iteration ceiling.

mod builder;
mod edge;
mod executor;
mod node;
mod types;

pub use builder::{Graph, GraphBuilder, DEFAULT_ERROR_LOG};
pub use edge::{ConditionRouter, Edge, RouterFn};
pub use executor::GraphExecutor;
pub use node::{FnNode, Node};
pub use types::{FallbackTrigger, NodeId, Route, RunOutcome, TerminationReason};
