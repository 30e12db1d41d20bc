// SPDX-License-Identifier: MIT

//! Graph workflow executor
//!
//! Runs one session at a time per session key, across every executor that
//! shares the checkpoint store: load the checkpoint, execute
//! the current node, merge its update, persist, route. The loop stops at
//! `Route::End`, at the iteration ceiling, on an undeclared route or when the
//! cancellation token fires between steps.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::builder::Graph;
use super::types::{FallbackTrigger, NodeId, Route, RunOutcome, TerminationReason};
use crate::adk::error::GraphError;
use crate::kinetic::workflow::checkpoint::{Checkpoint, CheckpointStore};
use crate::kinetic::workflow::state::{StateUpdate, WorkflowState};

/// Writer name used for the caller's initial update
const INPUT_WRITER: &str = "input";

/// Executes a compiled graph against a checkpoint store
pub struct GraphExecutor<N: NodeId> {
    graph: Arc<Graph<N>>,
    store: Arc<dyn CheckpointStore>,
}

impl<N: NodeId> Clone for GraphExecutor<N> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            store: self.store.clone(),
        }
    }
}

impl<N: NodeId> GraphExecutor<N> {
    pub fn new(graph: Graph<N>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            graph: Arc::new(graph),
            store,
        }
    }

    pub fn graph(&self) -> &Graph<N> {
        &self.graph
    }

    /// Run a session until it completes or hits `max_iterations` steps
    pub async fn run(
        &self,
        session_key: &str,
        input: StateUpdate,
        max_iterations: usize,
    ) -> Result<RunOutcome<N>, GraphError> {
        self.run_with_cancel(session_key, input, max_iterations, CancellationToken::new())
            .await
    }

    /// Like `run`, stopping with `Cancelled` at the next loop boundary once
    /// `cancel` fires. A node that is already executing finishes first.
    pub async fn run_with_cancel(
        &self,
        session_key: &str,
        input: StateUpdate,
        max_iterations: usize,
        cancel: CancellationToken,
    ) -> Result<RunOutcome<N>, GraphError> {
        let _session = self.store.session_locks().acquire(session_key).await;

        let (mut state, mut iteration, mut last_name) = match self.store.load(session_key)? {
            Some(cp) => {
                log::info!(
                    "[{}] Resuming from checkpoint at iteration {}",
                    session_key,
                    cp.iteration
                );
                (
                    WorkflowState::from_snapshot(self.graph.schema.clone(), cp.state),
                    cp.iteration,
                    cp.last_node,
                )
            }
            None => {
                log::info!("[{}] Starting new session", session_key);
                (WorkflowState::new(self.graph.schema.clone()), 0, None)
            }
        };

        state.apply(&input, INPUT_WRITER)?;
        self.persist(session_key, &state, iteration, last_name.clone())?;

        let mut current = self.graph.entry;
        let mut last_node = None;
        let mut steps = 0usize;

        let reason = loop {
            if steps >= max_iterations {
                log::warn!(
                    "[{}] Iteration limit of {} steps reached at '{}'",
                    session_key,
                    max_iterations,
                    current
                );
                let message = format!(
                    "unable to complete: iteration limit of {} steps reached",
                    max_iterations
                );
                self.degrade(&mut state, current, iteration, FallbackTrigger::IterationLimit, &message)
                    .await;
                self.persist(session_key, &state, iteration, last_name.clone())?;
                break TerminationReason::IterationLimit;
            }

            if cancel.is_cancelled() {
                log::info!("[{}] Cancelled before '{}'", session_key, current);
                break TerminationReason::Cancelled;
            }

            let node = self
                .graph
                .node(current)
                .ok_or_else(|| GraphError::UnknownNode {
                    from: "executor".to_string(),
                    to: current.to_string(),
                })?;

            steps += 1;
            iteration += 1;
            log::info!(
                "[{}] Step {} (run step {}): executing node '{}'",
                session_key,
                iteration,
                steps,
                current
            );

            match node.execute(&state).await {
                Ok(update) => {
                    if let Err(e) = state.apply(&update, node.name()) {
                        log::error!("[{}] Node '{}' update rejected: {}", session_key, current, e);
                        self.record_error(&mut state, current, "contract_violation", &e.to_string(), iteration);
                    } else {
                        log::debug!("[{}] Node '{}' completed", session_key, current);
                    }
                }
                Err(failure) => {
                    log::warn!("[{}] Node '{}' failed: {}", session_key, current, failure);
                    self.record_error(
                        &mut state,
                        current,
                        &failure.kind.to_string(),
                        &failure.message,
                        iteration,
                    );
                }
            }

            last_node = Some(current);
            last_name = Some(current.to_string());
            self.persist(session_key, &state, iteration, last_name.clone())?;

            let edge = self
                .graph
                .edge(current)
                .ok_or_else(|| GraphError::MissingEdge(current.to_string()))?;

            match edge.resolve(&state) {
                Ok(Route::End) => {
                    log::info!("[{}] Completed after {} steps", session_key, steps);
                    break TerminationReason::Completed;
                }
                Ok(Route::To(next)) => {
                    log::debug!("[{}] Routing '{}' -> '{}'", session_key, current, next);
                    current = next;
                }
                Err(bad) => {
                    let message = format!(
                        "router returned '{}', which is not a declared successor",
                        bad
                    );
                    log::error!("[{}] Node '{}': {}", session_key, current, message);
                    self.record_error(&mut state, current, "invalid_route", &message, iteration);
                    self.degrade(
                        &mut state,
                        current,
                        iteration,
                        FallbackTrigger::InvalidRoute,
                        "unable to complete: invalid route",
                    )
                    .await;
                    self.persist(session_key, &state, iteration, last_name.clone())?;
                    break TerminationReason::InvalidRoute;
                }
            }
        };

        Ok(RunOutcome {
            state,
            reason,
            steps,
            iteration,
            last_node,
        })
    }

    /// Latest checkpoint for a session
    pub async fn get_state(&self, session_key: &str) -> Result<Option<Checkpoint>, GraphError> {
        Ok(self.store.load(session_key)?)
    }

    /// Delete a session's checkpoint, waiting for any run in progress
    pub async fn reset(&self, session_key: &str) -> Result<bool, GraphError> {
        let _session = self.store.session_locks().acquire(session_key).await;
        let deleted = self.store.delete(session_key)?;
        log::info!("[{}] Session reset", session_key);
        Ok(deleted)
    }

    fn persist(
        &self,
        session_key: &str,
        state: &WorkflowState,
        iteration: u64,
        last_node: Option<String>,
    ) -> Result<(), GraphError> {
        let checkpoint =
            Checkpoint::new(session_key, state.snapshot(), iteration).with_last_node(last_node);
        self.store.save(&checkpoint)?;
        Ok(())
    }

    fn record_error(&self, state: &mut WorkflowState, node: N, kind: &str, message: &str, step: u64) {
        let record = error_record(&node.to_string(), kind, message, step);
        if let Err(e) = state.update(&self.graph.error_log, record) {
            log::error!("Failed to record error for '{}': {}", node, e);
        }
    }

    /// Apply the degraded final update: flag and reason fields first, then
    /// the fallback node once, or a synthesized error record without one.
    async fn degrade(
        &self,
        state: &mut WorkflowState,
        node: N,
        step: u64,
        trigger: FallbackTrigger,
        message: &str,
    ) {
        let mut marks = StateUpdate::new();
        if let Some(field) = &self.graph.fallback_reason {
            marks = marks.set(field.as_str(), trigger.as_str());
        }
        if let Some(field) = &self.graph.degraded_flag {
            marks = marks.set(field.as_str(), true);
        }
        if let Err(e) = state.apply(&marks, "executor") {
            log::error!("Failed to mark degraded state: {}", e);
        }

        match &self.graph.fallback {
            Some(fallback) => match fallback.execute(state).await {
                Ok(update) => {
                    if let Err(e) = state.apply(&update, fallback.name()) {
                        self.record_error(state, node, "contract_violation", &e.to_string(), step);
                    }
                }
                Err(failure) => {
                    log::error!("Fallback '{}' failed: {}", fallback.name(), failure);
                    self.record_error(state, node, &failure.kind.to_string(), &failure.message, step);
                }
            },
            None => self.record_error(state, node, trigger.as_str(), message, step),
        }
    }
}

fn error_record(node: &str, kind: &str, message: &str, step: u64) -> Value {
    json!({
        "node": node,
        "kind": kind,
        "message": message,
        "step": step,
        "timestamp": Utc::now().to_rfc3339(),
    })
}
