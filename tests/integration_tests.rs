// SPDX-License-Identifier: MIT

//! Integration tests for graph execution
//!
//! These tests drive whole graphs through the public API using mock nodes
//! and tools.

use async_trait::async_trait;
use kinetic_graph::adk::resilience::{CircuitBreakerConfig, CircuitState, Sleeper};
use kinetic_graph::adk::tool::Tool;
use kinetic_graph::kinetic::workflow::approval::AutoDecision;
use kinetic_graph::kinetic::workflow::registry::ToolRegistry;
use kinetic_graph::kinetic::workflow::state::FieldType;
use kinetic_graph::{
    ApprovalGate, CheckpointStore, CircuitBreakerRegistry, ConditionRouter, FnNode, GraphBuilder,
    GraphError, GraphExecutor, MemoryCheckpointStore, Node, NodeFailure, ResourceError,
    ResourceKey, RetryPolicy, Route, SqliteCheckpointStore, StateSchema, StateUpdate,
    TerminationReason, WorkflowState,
};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Mock Components
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Step {
    Agent,
    Tools,
    Review,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Agent => write!(f, "agent"),
            Step::Tools => write!(f, "tools"),
            Step::Review => write!(f, "review"),
        }
    }
}

static MOCK_TOOL_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "order_id": {"type": "string"}
        }
    })
});

/// Tool that always fails transiently and counts its invocations
struct DownstreamOutage {
    calls: AtomicUsize,
}

#[async_trait]
impl Tool for DownstreamOutage {
    fn name(&self) -> &str {
        "inventory"
    }

    fn description(&self) -> &str {
        "Inventory lookup that is currently down"
    }

    fn schema(&self) -> &Value {
        &MOCK_TOOL_SCHEMA
    }

    async fn execute(&self, _input: Value) -> Result<Value, ResourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ResourceError::transient("inventory", "503 service unavailable"))
    }
}

/// Node that calls the inventory tool through the shared breaker
struct InventoryNode {
    registry: ToolRegistry,
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for InventoryNode {
    fn name(&self) -> &str {
        "tools"
    }

    fn writes(&self) -> Vec<&str> {
        vec!["log"]
    }

    async fn execute(&self, _state: &WorkflowState) -> Result<StateUpdate, NodeFailure> {
        let result = self
            .registry
            .call_guarded("inventory", json!({"order_id": "ORD1"}), &self.breakers, &self.retry)
            .await?;
        Ok(StateUpdate::new().append("log", result))
    }
}

/// Node that fails if two runs ever execute it at the same time
struct ExclusiveNode {
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for ExclusiveNode {
    fn name(&self) -> &str {
        "agent"
    }

    fn writes(&self) -> Vec<&str> {
        vec!["count", "log"]
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StateUpdate, NodeFailure> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        self.busy.store(false, Ordering::SeqCst);

        let count = state.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(StateUpdate::new().set("count", count + 1).append("log", "tick"))
    }
}

struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

fn schema() -> StateSchema {
    StateSchema::new()
        .overwrite("count", FieldType::Number)
        .with_default("count", 0)
        .append("log")
        .append("errors")
        .overwrite("pending_action", FieldType::Object)
        .overwrite("approval_status", FieldType::String)
        .overwrite("resolution_status", FieldType::String)
        .overwrite("resolution_notes", FieldType::String)
        .overwrite("fallback_reason", FieldType::String)
        .overwrite("degraded_mode", FieldType::Boolean)
        .with_default("degraded_mode", false)
}

fn memory_store() -> Arc<dyn CheckpointStore> {
    Arc::new(MemoryCheckpointStore::new())
}

fn counter(name: &'static str) -> FnNode {
    FnNode::new(name, &["count", "log"], move |state| {
        let count = state.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(StateUpdate::new().set("count", count + 1).append("log", name))
    })
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_agent_tools_cycle_stops_at_ceiling() {
    let graph = GraphBuilder::new(schema())
        .add_node(Step::Agent, counter("agent"))
        .add_node(Step::Tools, counter("tools"))
        .add_edge(Step::Agent, Step::Tools)
        .add_edge(Step::Tools, Step::Agent)
        .set_entry(Step::Agent)
        .fallback(FnNode::new("escalate", &["resolution_status"], |_| {
            Ok(StateUpdate::new().set("resolution_status", "escalated"))
        }))
        .fallback_reason_field("fallback_reason")
        .degraded_flag("degraded_mode")
        .compile()
        .unwrap();
    let exec = GraphExecutor::new(graph, memory_store());

    let outcome = exec.run("cycle", StateUpdate::new(), 6).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::IterationLimit);
    assert!(outcome.reason.is_degraded());
    assert_eq!(outcome.steps, 6);
    assert_eq!(
        outcome.state.get("log"),
        Some(&json!(["agent", "tools", "agent", "tools", "agent", "tools"]))
    );
    assert_eq!(outcome.state.get_str("fallback_reason"), Some("iteration_limit"));
    assert_eq!(outcome.state.get_str("resolution_status"), Some("escalated"));
    assert_eq!(outcome.state.get("degraded_mode"), Some(&json!(true)));
}

#[tokio::test]
async fn test_three_step_merge() {
    let graph = GraphBuilder::new(schema())
        .add_node(
            Step::Agent,
            FnNode::new("one", &["count"], |_| Ok(StateUpdate::new().set("count", 1))),
        )
        .add_node(
            Step::Tools,
            FnNode::new("two", &["count"], |_| Ok(StateUpdate::new().set("count", 2))),
        )
        .add_node(
            Step::Review,
            FnNode::new("three", &["log"], |_| Ok(StateUpdate::new().append("log", "x"))),
        )
        .add_edge(Step::Agent, Step::Tools)
        .add_edge(Step::Tools, Step::Review)
        .add_edge(Step::Review, Route::End)
        .set_entry(Step::Agent)
        .compile()
        .unwrap();
    let exec = GraphExecutor::new(graph, memory_store());

    let outcome = exec.run("merge", StateUpdate::new(), 10).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::Completed);
    assert_eq!(outcome.state.get("count"), Some(&json!(2)));
    assert_eq!(outcome.state.get("log"), Some(&json!(["x"])));
}

#[tokio::test]
async fn test_resume_keeps_append_history() {
    let store = memory_store();
    let build = || {
        GraphBuilder::new(schema())
            .add_node(Step::Agent, counter("agent"))
            .add_edge(Step::Agent, Route::End)
            .set_entry(Step::Agent)
            .compile()
            .unwrap()
    };

    let first = GraphExecutor::new(build(), store.clone());
    first
        .run("resume", StateUpdate::new().append("log", "hello"), 5)
        .await
        .unwrap();

    // a fresh executor over the same store picks up the checkpoint
    let second = GraphExecutor::new(build(), store.clone());
    let outcome = second
        .run("resume", StateUpdate::new().append("log", "again"), 5)
        .await
        .unwrap();

    assert_eq!(
        outcome.state.get("log"),
        Some(&json!(["hello", "agent", "again", "agent"]))
    );
    assert_eq!(outcome.state.get("count"), Some(&json!(2)));
    assert_eq!(outcome.steps, 1);
    assert_eq!(outcome.iteration, 2);
}

#[tokio::test]
async fn test_condition_router_picks_first_match() {
    let router = ConditionRouter::new(Route::End)
        .when("count > 5", Route::To(Step::Review))
        .unwrap()
        .when("count > 1", Route::To(Step::Tools))
        .unwrap();
    let graph = GraphBuilder::new(schema())
        .add_node(Step::Agent, counter("agent"))
        .add_node(Step::Tools, counter("tools"))
        .add_node(Step::Review, counter("review"))
        .add_conditional_edges(Step::Agent, router)
        .add_edge(Step::Tools, Route::End)
        .add_edge(Step::Review, Route::End)
        .set_entry(Step::Agent)
        .compile()
        .unwrap();
    let exec = GraphExecutor::new(graph, memory_store());

    let outcome = exec
        .run("high", StateUpdate::new().set("count", 10), 5)
        .await
        .unwrap();
    assert_eq!(outcome.last_node, Some(Step::Review));

    let outcome = exec
        .run("mid", StateUpdate::new().set("count", 2), 5)
        .await
        .unwrap();
    assert_eq!(outcome.last_node, Some(Step::Tools));

    let outcome = exec.run("low", StateUpdate::new(), 5).await.unwrap();
    assert_eq!(outcome.last_node, Some(Step::Agent));
}

// ============================================================================
// Resilience
// ============================================================================

#[tokio::test]
async fn test_breaker_shared_across_sessions() {
    let tool = Arc::new(DownstreamOutage {
        calls: AtomicUsize::new(0),
    });
    let registry = ToolRegistry::new();
    registry.register(tool.clone()).await;
    let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 3,
        timeout: Duration::from_secs(60),
    });

    let graph = GraphBuilder::new(schema())
        .add_node(
            Step::Tools,
            InventoryNode {
                registry,
                breakers: breakers.clone(),
                retry: RetryPolicy::new(1, Duration::from_millis(1)).with_sleeper(Arc::new(NoSleep)),
            },
        )
        .add_edge(Step::Tools, Route::End)
        .set_entry(Step::Tools)
        .compile()
        .unwrap();
    let exec = GraphExecutor::new(graph, memory_store());

    for session in ["s1", "s2", "s3"] {
        let outcome = exec.run(session, StateUpdate::new(), 5).await.unwrap();
        assert_eq!(outcome.reason, TerminationReason::Completed);
        assert_eq!(outcome.state.last_of("errors").unwrap()["kind"], json!("transient"));
    }
    assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    assert_eq!(breakers.state(&ResourceKey::new("inventory")), CircuitState::Open);

    let outcome = exec.run("s4", StateUpdate::new(), 5).await.unwrap();
    let record = outcome.state.last_of("errors").unwrap();
    assert_eq!(record["kind"], json!("circuit_open"));
    assert_eq!(record["node"], json!("tools"));
    assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_approval_denial_escalates() {
    let graph = GraphBuilder::new(schema())
        .add_node(
            Step::Agent,
            FnNode::new("agent", &["pending_action"], |_| {
                Ok(StateUpdate::new().set(
                    "pending_action",
                    json!({"name": "delete_account", "args": {"account_id": "ACC9"}}),
                ))
            }),
        )
        .add_node(Step::Review, ApprovalGate::new(Arc::new(AutoDecision::deny("policy"))))
        .add_edge(Step::Agent, Step::Review)
        .add_edge(Step::Review, Route::End)
        .set_entry(Step::Agent)
        .compile()
        .unwrap();
    let exec = GraphExecutor::new(graph, memory_store());

    let outcome = exec.run("deny", StateUpdate::new(), 5).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::Completed);
    assert_eq!(outcome.state.get("pending_action"), Some(&Value::Null));
    assert_eq!(outcome.state.get_str("approval_status"), Some("denied"));
    assert_eq!(outcome.state.get_str("resolution_status"), Some("escalated"));
    assert_eq!(outcome.state.get_str("resolution_notes"), Some("policy"));
}

#[tokio::test]
async fn test_undeclared_route_target_is_recorded_and_degrades() {
    let graph = GraphBuilder::new(schema())
        .add_node(Step::Agent, counter("agent"))
        .add_node(Step::Tools, counter("tools"))
        .add_router(Step::Agent, &[Route::End], |_| Route::To(Step::Tools))
        .add_edge(Step::Tools, Route::End)
        .set_entry(Step::Agent)
        .fallback(FnNode::new("escalate", &["resolution_status"], |_| {
            Ok(StateUpdate::new().set("resolution_status", "escalated"))
        }))
        .fallback_reason_field("fallback_reason")
        .degraded_flag("degraded_mode")
        .compile()
        .unwrap();
    let exec = GraphExecutor::new(graph, memory_store());

    let outcome = exec.run("misroute", StateUpdate::new(), 5).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::InvalidRoute);
    assert!(outcome.reason.is_degraded());
    assert_eq!(outcome.steps, 1);
    assert_eq!(outcome.last_node, Some(Step::Agent));
    assert_eq!(outcome.state.get("log"), Some(&json!(["agent"])));

    assert_eq!(outcome.state.len_of("errors"), 1);
    let record = outcome.state.last_of("errors").unwrap();
    assert_eq!(record["node"], json!("agent"));
    assert_eq!(record["kind"], json!("invalid_route"));
    assert_eq!(record["step"], json!(1));
    assert!(record["message"].as_str().unwrap().contains("'tools'"));

    let checkpoint = exec.get_state("misroute").await.unwrap().unwrap();
    assert_eq!(checkpoint.iteration, 1);
    assert_eq!(checkpoint.last_node.as_deref(), Some("agent"));
    assert_eq!(checkpoint.state["errors"], json!([record.clone()]));
    assert_eq!(checkpoint.state["fallback_reason"], json!("invalid_route"));
    assert_eq!(checkpoint.state["degraded_mode"], json!(true));
    assert_eq!(checkpoint.state["resolution_status"], json!("escalated"));
    assert_eq!(checkpoint.state["log"], json!(["agent"]));
}

// ============================================================================
// Compilation
// ============================================================================

#[test]
fn test_compile_rejects_undeclared_write() {
    let err = GraphBuilder::new(schema())
        .add_node(
            Step::Agent,
            FnNode::new("agent", &["confidence"], |_| Ok(StateUpdate::new())),
        )
        .add_edge(Step::Agent, Route::End)
        .set_entry(Step::Agent)
        .compile()
        .err()
        .unwrap();

    assert!(matches!(
        err,
        GraphError::UndeclaredField { ref field, ref writer } if field == "confidence" && writer == "agent"
    ));
}

#[test]
fn test_compile_rejects_unknown_router_target() {
    let err = GraphBuilder::new(schema())
        .add_node(Step::Agent, counter("agent"))
        .add_router(Step::Agent, &[Route::To(Step::Tools), Route::End], |_| Route::End)
        .set_entry(Step::Agent)
        .compile()
        .err()
        .unwrap();

    assert!(matches!(err, GraphError::UnknownNode { ref to, .. } if to == "tools"));
}

#[test]
fn test_compile_rejects_missing_edge() {
    let err = GraphBuilder::new(schema())
        .add_node(Step::Agent, counter("agent"))
        .add_node(Step::Tools, counter("tools"))
        .add_edge(Step::Agent, Step::Tools)
        .set_entry(Step::Agent)
        .compile()
        .err()
        .unwrap();

    assert!(matches!(err, GraphError::MissingEdge(ref node) if node == "tools"));
}

// ============================================================================
// Sessions and persistence
// ============================================================================

#[tokio::test]
async fn test_concurrent_runs_on_one_session_serialize() {
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let graph = GraphBuilder::new(schema())
        .add_node(
            Step::Agent,
            ExclusiveNode {
                busy: busy.clone(),
                overlaps: overlaps.clone(),
            },
        )
        .add_edge(Step::Agent, Route::End)
        .set_entry(Step::Agent)
        .compile()
        .unwrap();
    let exec = GraphExecutor::new(graph, memory_store());

    let runs = (0..4).map(|_| {
        let exec = exec.clone();
        async move { exec.run("shared", StateUpdate::new(), 5).await }
    });
    let results = futures::future::join_all(runs).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);

    let checkpoint = exec.get_state("shared").await.unwrap().unwrap();
    assert_eq!(checkpoint.state["count"], json!(4));
    assert_eq!(checkpoint.state["log"], json!(["tick", "tick", "tick", "tick"]));
    assert_eq!(checkpoint.iteration, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executors_sharing_a_store_serialize() {
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let build = || {
        GraphBuilder::new(schema())
            .add_node(
                Step::Agent,
                ExclusiveNode {
                    busy: busy.clone(),
                    overlaps: overlaps.clone(),
                },
            )
            .add_edge(Step::Agent, Route::End)
            .set_entry(Step::Agent)
            .compile()
            .unwrap()
    };
    let store = Arc::new(MemoryCheckpointStore::new());
    let first = GraphExecutor::new(build(), store.clone());
    let second = GraphExecutor::new(build(), store.clone());

    let a = tokio::spawn(async move { first.run("shared", StateUpdate::new(), 5).await });
    let b = tokio::spawn(async move { second.run("shared", StateUpdate::new(), 5).await });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let checkpoint = store.load("shared").unwrap().unwrap();
    assert_eq!(checkpoint.state["count"], json!(2));
    assert_eq!(checkpoint.state["log"], json!(["tick", "tick"]));
    assert_eq!(checkpoint.iteration, 2);
    assert!(store.session_locks().is_empty());
}

#[tokio::test]
async fn test_sqlite_checkpoint_survives_reopen() {
    let path = std::env::temp_dir()
        .join(format!("kinetic_integration_{}", uuid::Uuid::new_v4()))
        .join("checkpoints.db");
    let build = || {
        GraphBuilder::new(schema())
            .add_node(Step::Agent, counter("agent"))
            .add_edge(Step::Agent, Route::End)
            .set_entry(Step::Agent)
            .compile()
            .unwrap()
    };

    {
        let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(&path).unwrap());
        let exec = GraphExecutor::new(build(), store);
        exec.run("durable", StateUpdate::new(), 5).await.unwrap();
    }

    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(&path).unwrap());
    assert_eq!(store.list_sessions().unwrap(), vec!["durable".to_string()]);

    let exec = GraphExecutor::new(build(), store.clone());
    let outcome = exec.run("durable", StateUpdate::new(), 5).await.unwrap();
    assert_eq!(outcome.state.get("count"), Some(&json!(2)));
    assert_eq!(outcome.iteration, 2);

    assert!(exec.reset("durable").await.unwrap());
    assert!(store.load("durable").unwrap().is_none());

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}
