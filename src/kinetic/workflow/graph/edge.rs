// SPDX-License-Identifier: MIT

//! Outgoing edges and routers

use std::fmt;
use std::sync::Arc;

use super::types::{NodeId, Route};
use crate::adk::error::GraphError;
use crate::kinetic::workflow::condition::{self, Expression};
use crate::kinetic::workflow::state::{StateSchema, WorkflowState};

/// Routing function evaluated against the merged state
pub type RouterFn<N> = Arc<dyn Fn(&WorkflowState) -> Route<N> + Send + Sync>;

/// The outgoing edge of a node
#[derive(Clone)]
pub enum Edge<N: NodeId> {
    /// Fixed successor
    Direct(Route<N>),
    /// State-dependent successor, restricted to `targets`
    Router {
        router: RouterFn<N>,
        targets: Vec<Route<N>>,
    },
}

impl<N: NodeId> Edge<N> {
    /// Every route this edge may produce
    pub fn targets(&self) -> Vec<Route<N>> {
        match self {
            Edge::Direct(route) => vec![*route],
            Edge::Router { targets, .. } => targets.clone(),
        }
    }

    /// Pick the next route. `Err` carries a router output outside the
    /// declared targets.
    pub fn resolve(&self, state: &WorkflowState) -> Result<Route<N>, Route<N>> {
        match self {
            Edge::Direct(route) => Ok(*route),
            Edge::Router { router, targets } => {
                let next = router(state);
                if targets.contains(&next) {
                    Ok(next)
                } else {
                    Err(next)
                }
            }
        }
    }
}

impl<N: NodeId> fmt::Debug for Edge<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Direct(route) => f.debug_tuple("Direct").field(route).finish(),
            Edge::Router { targets, .. } => {
                f.debug_struct("Router").field("targets", targets).finish()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Branch<N> {
    source: String,
    expr: Expression,
    target: Route<N>,
}

/// Declarative router built from `(condition, target)` branches.
///
/// Branches are checked in insertion order and the first match wins; the
/// default route is taken when none match.
///
/// ```ignore
/// let router = ConditionRouter::new(Route::End)
///     .when("degraded_mode", Route::To(Step::Fallback))?
///     .when("pending_action != null", Route::To(Step::Tools))?;
/// ```
#[derive(Debug, Clone)]
pub struct ConditionRouter<N> {
    branches: Vec<Branch<N>>,
    default: Route<N>,
}

impl<N: NodeId> ConditionRouter<N> {
    pub fn new(default: Route<N>) -> Self {
        Self {
            branches: Vec::new(),
            default,
        }
    }

    /// Add a branch. The condition is parsed immediately.
    pub fn when(mut self, condition: &str, target: Route<N>) -> Result<Self, GraphError> {
        let expr = condition::parse(condition).map_err(|e| GraphError::InvalidCondition {
            expr: condition.to_string(),
            message: e.to_string(),
        })?;
        self.branches.push(Branch {
            source: condition.to_string(),
            expr,
            target,
        });
        Ok(self)
    }

    /// Pick the first matching branch's target
    pub fn route(&self, state: &WorkflowState) -> Route<N> {
        match self.branches.iter().find(|b| condition::evaluate(&b.expr, state)) {
            Some(branch) => {
                log::debug!("Condition {} matched, routing to {}", branch.expr, branch.target);
                branch.target
            }
            None => self.default,
        }
    }

    /// Every route this router may produce, default last
    pub fn targets(&self) -> Vec<Route<N>> {
        let mut targets: Vec<Route<N>> = Vec::new();
        for route in self.branches.iter().map(|b| b.target).chain([self.default]) {
            if !targets.contains(&route) {
                targets.push(route);
            }
        }
        targets
    }

    /// Check that every condition reads a declared field
    pub fn validate(&self, schema: &StateSchema) -> Result<(), GraphError> {
        for branch in &self.branches {
            for path in branch.expr.paths() {
                let field = path.split('.').next().unwrap_or(path);
                if !schema.contains(field) {
                    return Err(GraphError::InvalidCondition {
                        expr: branch.source.clone(),
                        message: format!("unknown state field '{}'", field),
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn into_edge(self) -> Edge<N> {
        let targets = self.targets();
        Edge::Router {
            router: Arc::new(move |state| self.route(state)),
            targets,
        }
    }
}
