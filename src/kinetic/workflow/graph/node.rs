// SPDX-License-Identifier: MIT

//! Node abstraction for graph workflows

use async_trait::async_trait;

use crate::adk::error::NodeFailure;
use crate::kinetic::workflow::state::{StateUpdate, WorkflowState};

/// A unit of computation in a graph.
///
/// Nodes read the current state and return a partial update. They never
/// mutate the state directly; the executor merges the update using the
/// schema's reducers.
#[async_trait]
pub trait Node: Send + Sync {
    /// Name used in logs and error records
    fn name(&self) -> &str;

    /// Every field this node may write. Checked against the schema when the
    /// graph is compiled.
    fn writes(&self) -> Vec<&str>;

    async fn execute(&self, state: &WorkflowState) -> Result<StateUpdate, NodeFailure>;
}

type NodeFn = dyn Fn(&WorkflowState) -> Result<StateUpdate, NodeFailure> + Send + Sync;

/// Adapts a synchronous closure into a `Node`
pub struct FnNode {
    name: String,
    writes: Vec<String>,
    func: Box<NodeFn>,
}

impl FnNode {
    pub fn new<F>(name: impl Into<String>, writes: &[&str], func: F) -> Self
    where
        F: Fn(&WorkflowState) -> Result<StateUpdate, NodeFailure> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            writes: writes.iter().map(|w| w.to_string()).collect(),
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Node for FnNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> Vec<&str> {
        self.writes.iter().map(|w| w.as_str()).collect()
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StateUpdate, NodeFailure> {
        (self.func)(state)
    }
}
