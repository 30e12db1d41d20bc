// SPDX-License-Identifier: MIT

//! Built-in resilience drill
//!
//! A small agent ⇄ tools graph run against a deterministic flaky payment
//! resource. The agent checks a payment, then asks for a refund, which goes
//! through an approval gate. Depending on how many calls fail up front a run
//! recovers through retries or falls back to a cached status. Drills that
//! share a breaker registry open the circuit for later sessions.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::adk::error::{GraphError, KineticError, NodeFailure, ResourceError};
use crate::adk::resilience::{BreakerStatus, CircuitBreakerRegistry, RetryPolicy};
use crate::adk::tool::Tool;
use crate::kinetic::config::EngineConfig;
use crate::kinetic::workflow::approval::{
    ApprovalFields, ApprovalGate, AutoDecision, DecisionChannel,
};
use crate::kinetic::workflow::checkpoint::CheckpointStore;
use crate::kinetic::workflow::graph::{
    ConditionRouter, FallbackTrigger, FnNode, Graph, GraphBuilder, GraphExecutor, Node, Route,
    RunOutcome,
};
use crate::kinetic::workflow::registry::ToolRegistry;
use crate::kinetic::workflow::state::{FieldType, StateSchema, StateUpdate, WorkflowState};

pub const PAYMENT_TOOL: &str = "check_payment";
pub const REFUND_TOOL: &str = "process_refund";
const CUSTOMER_ID: &str = "CUST001";
const ORDER_ID: &str = "ORD12345";

/// Nodes of the drill graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrillStep {
    Agent,
    Tools,
    Approval,
}

impl fmt::Display for DrillStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrillStep::Agent => write!(f, "agent"),
            DrillStep::Tools => write!(f, "tools"),
            DrillStep::Approval => write!(f, "approval"),
        }
    }
}

/// Payment lookup that fails transiently for its first `fail_first` calls
pub struct FlakyPaymentApi {
    fail_first: usize,
    calls: AtomicUsize,
    schema: Value,
}

impl FlakyPaymentApi {
    pub fn new(fail_first: usize) -> Self {
        Self {
            fail_first,
            calls: AtomicUsize::new(0),
            schema: json!({
                "type": "object",
                "properties": {"customer_id": {"type": "string"}},
                "required": ["customer_id"]
            }),
        }
    }

    /// Calls made so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FlakyPaymentApi {
    fn name(&self) -> &str {
        PAYMENT_TOOL
    }

    fn description(&self) -> &str {
        "Look up a customer's payment status"
    }

    fn schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, input: Value) -> Result<Value, ResourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(ResourceError::transient(
                PAYMENT_TOOL,
                format!("connection reset (call {})", call),
            ));
        }
        let customer = input
            .get("customer_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ResourceError::fatal(PAYMENT_TOOL, "customer_id is required"))?;
        Ok(json!({"customer_id": customer, "status": "current", "last_payment": 89.99}))
    }
}

/// Refund processor that always succeeds
pub struct RefundApi {
    schema: Value,
}

impl RefundApi {
    pub fn new() -> Self {
        Self {
            schema: json!({
                "type": "object",
                "properties": {
                    "order_id": {"type": "string"},
                    "amount": {"type": "number"}
                }
            }),
        }
    }
}

impl Default for RefundApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RefundApi {
    fn name(&self) -> &str {
        REFUND_TOOL
    }

    fn description(&self) -> &str {
        "Refund an order"
    }

    fn schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, input: Value) -> Result<Value, ResourceError> {
        let order = input.get("order_id").and_then(|v| v.as_str()).unwrap_or("unknown");
        Ok(json!({"refund_id": format!("REF-{}", order), "status": "processed"}))
    }
}

/// Stand-in for the last known answer of a resource that cannot be reached
fn cached_result(tool: &str, args: &Value) -> Value {
    json!({"tool": tool, "status": "cached", "request": args})
}

/// Executes the pending action through the breaker and retry policy.
///
/// A resource that stays down (retries exhausted or circuit open) does not
/// fail the step: the node answers from cache and flags degraded mode.
struct ToolsNode {
    registry: ToolRegistry,
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for ToolsNode {
    fn name(&self) -> &str {
        "tools"
    }

    fn writes(&self) -> Vec<&str> {
        vec![
            "pending_action",
            "tool_results",
            "fallback_reason",
            "degraded_mode",
        ]
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StateUpdate, NodeFailure> {
        let name = state
            .get_path("pending_action.name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeFailure::fatal("no pending action to execute"))?;
        let args = state
            .get_path("pending_action.args")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match self
            .registry
            .call_guarded(name, args.clone(), &self.breakers, &self.retry)
            .await
        {
            Ok(result) => Ok(StateUpdate::new()
                .set("pending_action", Value::Null)
                .append("tool_results", json!({"tool": name, "ok": true, "result": result}))),
            Err(e) if e.is_circuit_open() || e.is_retryable() => {
                let trigger = if e.is_circuit_open() {
                    FallbackTrigger::CircuitOpen
                } else {
                    FallbackTrigger::RetriesExhausted
                };
                log::warn!(
                    "Tool '{}' unavailable ({}), answering from cache",
                    name,
                    trigger
                );
                Ok(StateUpdate::new()
                    .set("pending_action", Value::Null)
                    .set("degraded_mode", true)
                    .set("fallback_reason", trigger.as_str())
                    .append(
                        "tool_results",
                        json!({
                            "tool": name,
                            "ok": false,
                            "error": e.to_string(),
                            "result": cached_result(name, &args),
                        }),
                    ))
            }
            Err(e) => Err(NodeFailure::from(e)),
        }
    }
}

fn has_result(state: &WorkflowState, tool: &str) -> bool {
    state
        .get("tool_results")
        .and_then(|v| v.as_array())
        .map(|results| {
            results
                .iter()
                .any(|r| r["tool"] == json!(tool) && r["ok"] == json!(true))
        })
        .unwrap_or(false)
}

/// Deterministic stand-in for a model deciding the next action
fn agent_step(state: &WorkflowState) -> Result<StateUpdate, NodeFailure> {
    let done = StateUpdate::new().set("pending_action", Value::Null);

    if state.get("degraded_mode") == Some(&json!(true)) {
        return Ok(done
            .append(
                "messages",
                "Payment service is unavailable; using the cached account status",
            )
            .set("resolution_status", "degraded"));
    }
    if let Some(status) = state.get_str("resolution_status") {
        return Ok(done.append("messages", format!("Case closed as {}", status)));
    }
    if has_result(state, REFUND_TOOL) {
        return Ok(done
            .append("messages", format!("Refund issued for {}", ORDER_ID))
            .set("resolution_status", "resolved"));
    }
    if has_result(state, PAYMENT_TOOL) {
        return Ok(StateUpdate::new()
            .append("messages", "Payment confirmed, requesting a refund")
            .set(
                "pending_action",
                json!({
                    "name": REFUND_TOOL,
                    "args": {"order_id": ORDER_ID, "amount": 89.99},
                    "context": "customer reports a damaged item"
                }),
            ));
    }
    Ok(StateUpdate::new()
        .append("messages", "Checking payment status")
        .set(
            "pending_action",
            json!({"name": PAYMENT_TOOL, "args": {"customer_id": CUSTOMER_ID}}),
        ))
}

/// What the drill did
pub struct DrillReport {
    pub outcome: RunOutcome<DrillStep>,
    pub breakers: Vec<BreakerStatus>,
    /// Calls that reached the payment resource
    pub resource_calls: usize,
}

/// Configured drill, ready to run against a checkpoint store
pub struct Drill {
    max_iterations: usize,
    fail_first: usize,
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
    decision: Arc<dyn DecisionChannel>,
}

impl Drill {
    pub fn from_config(config: &EngineConfig, fail_first: usize) -> Self {
        Self {
            max_iterations: config.max_iterations,
            fail_first,
            breakers: CircuitBreakerRegistry::new(config.breaker_config()),
            retry: config.retry_policy(),
            decision: Arc::new(AutoDecision::deny("refunds need a human reviewer")),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breakers(mut self, breakers: CircuitBreakerRegistry) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_decision(mut self, decision: Arc<dyn DecisionChannel>) -> Self {
        self.decision = decision;
        self
    }

    /// Route approvals through the configured broker. Nothing answers drill
    /// requests, so the broker must time out.
    pub fn with_approval_broker(self, config: &EngineConfig) -> Result<Self, KineticError> {
        let timeout = config.approval.timeout_secs.ok_or_else(|| {
            KineticError::config("approval.timeout_secs must be set to use the approval broker")
        })?;
        log::info!("Refund approvals wait up to {}s on the broker", timeout);
        Ok(self.with_decision(Arc::new(config.approval_broker())))
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn schema() -> StateSchema {
        StateSchema::new()
            .overwrite("session_id", FieldType::String)
            .append("messages")
            .append("errors")
            .append("tool_results")
            .overwrite("pending_action", FieldType::Object)
            .overwrite("approval_status", FieldType::String)
            .overwrite("resolution_status", FieldType::String)
            .overwrite("resolution_notes", FieldType::String)
            .overwrite("fallback_reason", FieldType::String)
            .overwrite("degraded_mode", FieldType::Boolean)
            .with_default("degraded_mode", false)
    }

    /// Compile the drill graph around a payment resource
    pub async fn build(&self, payments: Arc<FlakyPaymentApi>) -> Result<Graph<DrillStep>, GraphError> {
        let registry = ToolRegistry::new();
        registry.register(payments).await;
        registry.register(Arc::new(RefundApi::new())).await;

        let tools = ToolsNode {
            registry,
            breakers: self.breakers.clone(),
            retry: self.retry.clone(),
        };
        let gate = ApprovalGate::with_fields(
            self.decision.clone(),
            ApprovalFields {
                session_key: Some("session_id".to_string()),
                ..Default::default()
            },
        );

        let after_agent = ConditionRouter::new(Route::End)
            .when(
                "pending_action.name == 'process_refund'",
                Route::To(DrillStep::Approval),
            )?
            .when("pending_action != null", Route::To(DrillStep::Tools))?;
        let after_approval = ConditionRouter::new(Route::To(DrillStep::Agent)).when(
            "approval_status == 'approved' and pending_action != null",
            Route::To(DrillStep::Tools),
        )?;

        GraphBuilder::new(Self::schema())
            .add_node(
                DrillStep::Agent,
                FnNode::new(
                    "agent",
                    &["messages", "pending_action", "resolution_status"],
                    agent_step,
                ),
            )
            .add_node(DrillStep::Tools, tools)
            .add_node(DrillStep::Approval, gate)
            .add_conditional_edges(DrillStep::Agent, after_agent)
            .add_edge(DrillStep::Tools, DrillStep::Agent)
            .add_conditional_edges(DrillStep::Approval, after_approval)
            .set_entry(DrillStep::Agent)
            .fallback(FnNode::new(
                "give_up",
                &["messages", "resolution_status"],
                |_| {
                    Ok(StateUpdate::new()
                        .append("messages", "Too many steps; handing over to a human")
                        .set("resolution_status", "escalated"))
                },
            ))
            .fallback_reason_field("fallback_reason")
            .degraded_flag("degraded_mode")
            .compile()
    }

    /// Run one drill session
    pub async fn run(
        &self,
        store: Arc<dyn CheckpointStore>,
        session_key: &str,
    ) -> Result<DrillReport, KineticError> {
        let payments = Arc::new(FlakyPaymentApi::new(self.fail_first));
        let graph = self.build(payments.clone()).await?;
        let executor = GraphExecutor::new(graph, store);

        let input = StateUpdate::new()
            .set("session_id", session_key)
            .append(
                "messages",
                format!("Customer {} wants a refund for {}", CUSTOMER_ID, ORDER_ID),
            );

        log::info!(
            "Starting drill '{}' with {} failing calls and a ceiling of {} steps",
            session_key,
            self.fail_first,
            self.max_iterations
        );
        let outcome = executor.run(session_key, input, self.max_iterations).await?;

        Ok(DrillReport {
            outcome,
            breakers: self.breakers.snapshot(),
            resource_calls: payments.calls(),
        })
    }
}
