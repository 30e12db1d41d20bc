// SPDX-License-Identifier: MIT

//! Graph construction and validation
//!
//! `GraphBuilder` collects nodes and edges, then `compile` checks the whole
//! transition table against the state schema. Every configuration error
//! surfaces there, before any session runs.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::edge::{ConditionRouter, Edge};
use super::node::Node;
use super::types::{NodeId, Route};
use crate::adk::error::GraphError;
use crate::kinetic::workflow::state::{ReducerType, StateSchema, WorkflowState};

/// Default field receiving error records
pub const DEFAULT_ERROR_LOG: &str = "errors";

/// A validated graph, ready to hand to `GraphExecutor`
pub struct Graph<N: NodeId> {
    pub(crate) schema: Arc<StateSchema>,
    pub(crate) nodes: HashMap<N, Arc<dyn Node>>,
    pub(crate) edges: HashMap<N, Edge<N>>,
    pub(crate) entry: N,
    pub(crate) error_log: String,
    pub(crate) fallback: Option<Arc<dyn Node>>,
    pub(crate) fallback_reason: Option<String>,
    pub(crate) degraded_flag: Option<String>,
}

impl<N: NodeId> Graph<N> {
    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    pub fn entry(&self) -> N {
        self.entry
    }

    pub fn error_log(&self) -> &str {
        &self.error_log
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: N) -> Option<&Arc<dyn Node>> {
        self.nodes.get(&id)
    }

    pub(crate) fn edge(&self, id: N) -> Option<&Edge<N>> {
        self.edges.get(&id)
    }
}

/// Builder for `Graph`.
///
/// Methods chain; mistakes such as a duplicate node are remembered and
/// reported by `compile`.
pub struct GraphBuilder<N: NodeId> {
    schema: StateSchema,
    nodes: Vec<(N, Arc<dyn Node>)>,
    edges: Vec<(N, Edge<N>)>,
    entry: Option<N>,
    error_log: String,
    fallback: Option<Arc<dyn Node>>,
    fallback_reason: Option<String>,
    degraded_flag: Option<String>,
    deferred: Vec<GraphError>,
}

impl<N: NodeId> GraphBuilder<N> {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
            error_log: DEFAULT_ERROR_LOG.to_string(),
            fallback: None,
            fallback_reason: None,
            degraded_flag: None,
            deferred: Vec::new(),
        }
    }

    pub fn add_node(mut self, id: N, node: impl Node + 'static) -> Self {
        self.nodes.push((id, Arc::new(node)));
        self
    }

    /// Add a node that is already shared elsewhere
    pub fn add_shared_node(mut self, id: N, node: Arc<dyn Node>) -> Self {
        self.nodes.push((id, node));
        self
    }

    /// Fixed edge from `from` to `to`
    pub fn add_edge(mut self, from: N, to: impl Into<Route<N>>) -> Self {
        self.edges.push((from, Edge::Direct(to.into())));
        self
    }

    /// State-dependent edge. `targets` lists every route the router may
    /// return; anything else ends the run with `InvalidRoute`.
    pub fn add_router<F>(mut self, from: N, targets: &[Route<N>], router: F) -> Self
    where
        F: Fn(&WorkflowState) -> Route<N> + Send + Sync + 'static,
    {
        self.edges.push((
            from,
            Edge::Router {
                router: Arc::new(router),
                targets: targets.to_vec(),
            },
        ));
        self
    }

    /// Declarative edge driven by condition expressions
    pub fn add_conditional_edges(mut self, from: N, router: ConditionRouter<N>) -> Self {
        if let Err(e) = router.validate(&self.schema) {
            self.deferred.push(e);
        }
        self.edges.push((from, router.into_edge()));
        self
    }

    pub fn set_entry(mut self, id: N) -> Self {
        self.entry = Some(id);
        self
    }

    /// Append field receiving error records (default `errors`)
    pub fn error_log(mut self, field: impl Into<String>) -> Self {
        self.error_log = field.into();
        self
    }

    /// Node run once when a run ends through the degraded path
    pub fn fallback(mut self, node: impl Node + 'static) -> Self {
        self.fallback = Some(Arc::new(node));
        self
    }

    /// Overwrite field that records the `FallbackTrigger` of a degraded run
    pub fn fallback_reason_field(mut self, field: impl Into<String>) -> Self {
        self.fallback_reason = Some(field.into());
        self
    }

    /// Overwrite field set to `true` when a run ends through the degraded path
    pub fn degraded_flag(mut self, field: impl Into<String>) -> Self {
        self.degraded_flag = Some(field.into());
        self
    }

    /// Validate the graph and freeze it
    pub fn compile(self) -> Result<Graph<N>, GraphError> {
        if let Some(err) = self.deferred.into_iter().next() {
            return Err(err);
        }
        self.schema.validate()?;

        let mut nodes: HashMap<N, Arc<dyn Node>> = HashMap::new();
        for (id, node) in self.nodes {
            if nodes.contains_key(&id) {
                return Err(GraphError::DuplicateNode(id.to_string()));
            }
            for field in node.writes() {
                if !self.schema.contains(field) {
                    return Err(GraphError::UndeclaredField {
                        field: field.to_string(),
                        writer: node.name().to_string(),
                    });
                }
            }
            nodes.insert(id, node);
        }

        let mut edges: HashMap<N, Edge<N>> = HashMap::new();
        for (from, edge) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(GraphError::UnknownNode {
                    from: "edge".to_string(),
                    to: from.to_string(),
                });
            }
            if edges.contains_key(&from) {
                return Err(GraphError::DuplicateEdge(from.to_string()));
            }
            let targets = edge.targets();
            if targets.is_empty() {
                return Err(GraphError::EmptyRouter {
                    node: from.to_string(),
                });
            }
            for target in targets {
                if let Route::To(to) = target {
                    if !nodes.contains_key(&to) {
                        return Err(GraphError::UnknownNode {
                            from: from.to_string(),
                            to: to.to_string(),
                        });
                    }
                }
            }
            edges.insert(from, edge);
        }

        if let Some(id) = nodes.keys().find(|id| !edges.contains_key(*id)) {
            return Err(GraphError::MissingEdge(id.to_string()));
        }

        let entry = self.entry.ok_or(GraphError::MissingEntry)?;
        if !nodes.contains_key(&entry) {
            return Err(GraphError::UnknownNode {
                from: "entry".to_string(),
                to: entry.to_string(),
            });
        }

        match self.schema.reducer(&self.error_log) {
            Some(ReducerType::Append) => {}
            Some(ReducerType::Overwrite) => {
                return Err(GraphError::InvalidSchema(format!(
                    "error log field '{}' must use the append reducer",
                    self.error_log
                )))
            }
            None => {
                return Err(GraphError::UndeclaredField {
                    field: self.error_log,
                    writer: "executor".to_string(),
                })
            }
        }

        if let Some(field) = &self.fallback_reason {
            check_executor_field(&self.schema, field, &Value::from("iteration_limit"), "string")?;
        }
        if let Some(field) = &self.degraded_flag {
            check_executor_field(&self.schema, field, &Value::Bool(true), "boolean")?;
        }

        if let Some(fallback) = &self.fallback {
            for field in fallback.writes() {
                if !self.schema.contains(field) {
                    return Err(GraphError::UndeclaredField {
                        field: field.to_string(),
                        writer: fallback.name().to_string(),
                    });
                }
            }
        }

        log::debug!(
            "Compiled graph with {} nodes, entry '{}'",
            nodes.len(),
            entry
        );

        Ok(Graph {
            schema: Arc::new(self.schema),
            nodes,
            edges,
            entry,
            error_log: self.error_log,
            fallback: self.fallback,
            fallback_reason: self.fallback_reason,
            degraded_flag: self.degraded_flag,
        })
    }
}

/// A field the executor overwrites during degradation must take `sample`
fn check_executor_field(
    schema: &StateSchema,
    field: &str,
    sample: &Value,
    kind: &str,
) -> Result<(), GraphError> {
    let def = schema.get(field).ok_or_else(|| GraphError::UndeclaredField {
        field: field.to_string(),
        writer: "executor".to_string(),
    })?;
    if def.reducer != ReducerType::Overwrite || !def.accepts_write(sample) {
        return Err(GraphError::InvalidSchema(format!(
            "executor field '{}' must be an overwrite {} field, found {} {}",
            field,
            kind,
            def.reducer.as_str(),
            def.describe()
        )));
    }
    Ok(())
}
