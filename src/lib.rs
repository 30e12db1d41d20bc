// SPDX-License-Identifier: MIT

//! kinetic-graph: stateful workflow graphs for agent-style processes.
//!
//! A graph of nodes threads one `WorkflowState` through a run. Each node
//! returns a partial update that is merged per the state schema, routers pick
//! the next node, and every step is checkpointed so a session can resume.
//! Runs always terminate: at the end sentinel or at the iteration ceiling.

pub mod adk;
pub mod kinetic;

pub use adk::error::{FailureKind, GraphError, KineticError, NodeFailure, ResourceError};
pub use adk::resilience::{CircuitBreakerRegistry, ResourceKey, RetryPolicy};
pub use kinetic::config::EngineConfig;
pub use kinetic::workflow::approval::{ApprovalBroker, ApprovalDecision, ApprovalGate, PendingAction};
pub use kinetic::workflow::checkpoint::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, SessionLocks, SqliteCheckpointStore,
};
pub use kinetic::workflow::graph::{
    ConditionRouter, FallbackTrigger, FnNode, GraphBuilder, GraphExecutor, Node, NodeId, Route,
    RunOutcome, TerminationReason,
};
pub use kinetic::workflow::state::{StateSchema, StateUpdate, WorkflowState};
