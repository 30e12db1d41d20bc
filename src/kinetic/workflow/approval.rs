// SPDX-License-Identifier: MIT

//! Human approval for sensitive actions
//!
//! `ApprovalGate` is a node that looks for a pending action in state and asks
//! a `DecisionChannel` whether it may run. Denials are a normal outcome: the
//! action is dropped and the session is marked escalated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

use crate::adk::error::NodeFailure;
use crate::kinetic::workflow::graph::Node;
use crate::kinetic::workflow::state::{StateUpdate, WorkflowState};

/// Denial reason used when the decision-maker goes away without answering
pub const CHANNEL_CLOSED: &str = "approval channel closed";

/// An action waiting for a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    /// Action name, e.g. `process_refund`
    pub action: String,
    /// Identifiers of the resources the action touches
    pub resources: Vec<String>,
    pub params: Value,
    /// Free-form context from the requesting node
    pub context: Option<String>,
    pub session_key: String,
    pub requested_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(action: impl Into<String>, params: Value, session_key: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            resources: Vec::new(),
            params,
            context: None,
            session_key: session_key.into(),
            requested_at: Utc::now(),
        }
    }

    /// Build from the object a node stored in state.
    ///
    /// Accepts `name` or `action` for the action, `args` or `params` for the
    /// parameters. Resource ids come from `resources`, or else from any
    /// string parameter whose key ends in `_id`.
    pub fn from_state_value(value: &Map<String, Value>, session_key: &str) -> Option<Self> {
        let action = value
            .get("name")
            .or_else(|| value.get("action"))
            .and_then(|v| v.as_str())?;
        let params = value
            .get("args")
            .or_else(|| value.get("params"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let resources = match value.get("resources").and_then(|v| v.as_array()) {
            Some(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            None => params
                .as_object()
                .map(|args| {
                    args.iter()
                        .filter(|(k, _)| k.ends_with("_id"))
                        .filter_map(|(_, v)| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
        };

        let mut pending = Self::new(action, params, session_key);
        pending.resources = resources;
        pending.context = value
            .get("context")
            .and_then(|v| v.as_str())
            .map(String::from);
        Some(pending)
    }
}

/// Outcome of an approval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
}

impl ApprovalDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }
}

/// Something that can approve or deny a pending action
#[async_trait]
pub trait DecisionChannel: Send + Sync {
    async fn decide(&self, action: PendingAction) -> ApprovalDecision;
}

/// State fields the gate reads and writes
#[derive(Debug, Clone)]
pub struct ApprovalFields {
    pub pending: String,
    pub approval_status: String,
    pub resolution_status: String,
    pub resolution_notes: String,
    /// Read-only field holding the session key, if the schema has one
    pub session_key: Option<String>,
}

impl Default for ApprovalFields {
    fn default() -> Self {
        Self {
            pending: "pending_action".to_string(),
            approval_status: "approval_status".to_string(),
            resolution_status: "resolution_status".to_string(),
            resolution_notes: "resolution_notes".to_string(),
            session_key: None,
        }
    }
}

/// Node that holds a pending action until a decision arrives
pub struct ApprovalGate {
    name: String,
    fields: ApprovalFields,
    channel: Arc<dyn DecisionChannel>,
}

impl ApprovalGate {
    pub fn new(channel: Arc<dyn DecisionChannel>) -> Self {
        Self::with_fields(channel, ApprovalFields::default())
    }

    pub fn with_fields(channel: Arc<dyn DecisionChannel>, fields: ApprovalFields) -> Self {
        Self {
            name: "approval_gate".to_string(),
            fields,
            channel,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Node for ApprovalGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> Vec<&str> {
        vec![
            self.fields.pending.as_str(),
            self.fields.approval_status.as_str(),
            self.fields.resolution_status.as_str(),
            self.fields.resolution_notes.as_str(),
        ]
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StateUpdate, NodeFailure> {
        let pending = match state.get(&self.fields.pending) {
            Some(Value::Object(obj)) => obj,
            _ => return Ok(StateUpdate::new()),
        };

        let session_key = self
            .fields
            .session_key
            .as_deref()
            .and_then(|field| state.get_str(field))
            .unwrap_or_default();
        let action = PendingAction::from_state_value(pending, session_key).ok_or_else(|| {
            NodeFailure::fatal(format!(
                "'{}' holds an action without a name",
                self.fields.pending
            ))
        })?;

        log::info!(
            "Approval requested for '{}' on {:?} (request {})",
            action.action,
            action.resources,
            action.id
        );

        match self.channel.decide(action).await {
            ApprovalDecision::Approved => {
                log::info!("Action approved");
                Ok(StateUpdate::new().set(self.fields.approval_status.as_str(), "approved"))
            }
            ApprovalDecision::Denied { reason } => {
                log::warn!("Action denied: {}", reason);
                Ok(StateUpdate::new()
                    .set(self.fields.pending.as_str(), Value::Null)
                    .set(self.fields.approval_status.as_str(), "denied")
                    .set(self.fields.resolution_status.as_str(), "escalated")
                    .set(self.fields.resolution_notes.as_str(), reason))
            }
        }
    }
}

/// Manages pending approval requests with oneshot channels.
///
/// `decide` parks the request until an operator calls `respond`. With a
/// timeout, silence becomes a denial.
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, (PendingAction, oneshot::Sender<ApprovalDecision>)>>,
    timeout: Option<Duration>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Queue a request and return the receiver to await
    pub async fn request(&self, action: PendingAction) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        let id = action.id.clone();
        self.pending.lock().await.insert(id, (action, tx));
        rx
    }

    /// Respond to a pending request. Returns true if it was found.
    pub async fn respond(&self, request_id: &str, decision: ApprovalDecision) -> bool {
        let entry = self.pending.lock().await.remove(request_id);
        match entry {
            Some((_action, tx)) => {
                // receiver may already be gone after a timeout
                let _ = tx.send(decision);
                true
            }
            None => false,
        }
    }

    /// Drop a request without answering it
    pub async fn cancel(&self, request_id: &str) -> bool {
        self.pending.lock().await.remove(request_id).is_some()
    }

    /// Outstanding requests, oldest first
    pub async fn pending_requests(&self) -> Vec<PendingAction> {
        let mut requests: Vec<PendingAction> = self
            .pending
            .lock()
            .await
            .values()
            .map(|(action, _)| action.clone())
            .collect();
        requests.sort_by_key(|a| a.requested_at);
        requests
    }

    /// Find a pending request by prefix match on the ID
    pub async fn find_by_prefix(&self, prefix: &str) -> Option<String> {
        let pending = self.pending.lock().await;
        pending.keys().find(|key| key.starts_with(prefix)).cloned()
    }
}

impl Default for ApprovalBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionChannel for ApprovalBroker {
    async fn decide(&self, action: PendingAction) -> ApprovalDecision {
        let id = action.id.clone();
        let rx = self.request(action).await;

        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    log::warn!("Approval request {} timed out", id);
                    return ApprovalDecision::denied(format!(
                        "approval timed out after {}s",
                        limit.as_secs()
                    ));
                }
            },
            None => rx.await,
        };

        received.unwrap_or_else(|_| ApprovalDecision::denied(CHANNEL_CLOSED))
    }
}

/// Fixed policy for non-interactive deployments
#[derive(Debug, Clone)]
pub struct AutoDecision(ApprovalDecision);

impl AutoDecision {
    pub fn approve() -> Self {
        Self(ApprovalDecision::Approved)
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self(ApprovalDecision::denied(reason))
    }
}

#[async_trait]
impl DecisionChannel for AutoDecision {
    async fn decide(&self, action: PendingAction) -> ApprovalDecision {
        log::debug!("Auto decision for '{}': {:?}", action.action, self.0);
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::state::{FieldType, StateSchema};
    use serde_json::json;

    fn state_with_pending(pending: Value) -> WorkflowState {
        let schema = StateSchema::new()
            .overwrite("pending_action", FieldType::Object)
            .overwrite("approval_status", FieldType::String)
            .overwrite("resolution_status", FieldType::String)
            .overwrite("resolution_notes", FieldType::String)
            .overwrite("session_id", FieldType::String);
        let mut state = WorkflowState::new(Arc::new(schema));
        state.update("pending_action", pending).unwrap();
        state.update("session_id", json!("sess-9")).unwrap();
        state
    }

    fn refund() -> Value {
        json!({
            "name": "process_refund",
            "args": {"order_id": "ORD12345", "amount": 89.99},
            "context": "customer reports damaged item"
        })
    }

    fn apply(state: &mut WorkflowState, update: StateUpdate) {
        state.apply(&update, "approval_gate").unwrap();
    }

    #[test]
    fn test_pending_action_from_state_value() {
        let value = refund();
        let action = PendingAction::from_state_value(value.as_object().unwrap(), "s").unwrap();
        assert_eq!(action.action, "process_refund");
        assert_eq!(action.resources, vec!["ORD12345"]);
        assert_eq!(action.params["amount"], json!(89.99));
        assert_eq!(action.context.as_deref(), Some("customer reports damaged item"));

        let bare = json!({"args": {}});
        assert!(PendingAction::from_state_value(bare.as_object().unwrap(), "s").is_none());
    }

    #[tokio::test]
    async fn test_gate_passes_through_without_pending_action() {
        let gate = ApprovalGate::new(Arc::new(AutoDecision::deny("never asked")));
        let state = state_with_pending(Value::Null);

        let update = gate.execute(&state).await.unwrap();
        assert!(update.is_empty());
    }

    #[tokio::test]
    async fn test_gate_approved_keeps_action() {
        let gate = ApprovalGate::new(Arc::new(AutoDecision::approve()));
        let mut state = state_with_pending(refund());

        let update = gate.execute(&state).await.unwrap();
        apply(&mut state, update);

        assert_eq!(state.get_str("approval_status"), Some("approved"));
        assert_eq!(state.get("pending_action"), Some(&refund()));
    }

    #[tokio::test]
    async fn test_gate_denied_escalates_with_reason() {
        let gate = ApprovalGate::new(Arc::new(AutoDecision::deny("policy")));
        let mut state = state_with_pending(refund());

        let update = gate.execute(&state).await.unwrap();
        apply(&mut state, update);

        assert_eq!(state.get("pending_action"), Some(&Value::Null));
        assert_eq!(state.get_str("resolution_status"), Some("escalated"));
        assert_eq!(state.get_str("resolution_notes"), Some("policy"));
        assert_eq!(state.get_str("approval_status"), Some("denied"));
    }

    #[tokio::test]
    async fn test_gate_rejects_nameless_action() {
        let gate = ApprovalGate::new(Arc::new(AutoDecision::approve()));
        let state = state_with_pending(json!({"args": {}}));
        assert!(gate.execute(&state).await.is_err());
    }

    #[tokio::test]
    async fn test_broker_round_trip_through_gate() {
        let broker = Arc::new(ApprovalBroker::new());
        let fields = ApprovalFields {
            session_key: Some("session_id".to_string()),
            ..ApprovalFields::default()
        };
        let gate = ApprovalGate::with_fields(broker.clone(), fields);
        let state = state_with_pending(refund());

        let operator = {
            let broker = broker.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(request) = broker.pending_requests().await.into_iter().next() {
                        assert_eq!(request.session_key, "sess-9");
                        let id = broker.find_by_prefix(&request.id[..8]).await.unwrap();
                        assert!(broker.respond(&id, ApprovalDecision::Approved).await);
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let update = gate.execute(&state).await.unwrap();
        operator.await.unwrap();
        assert_eq!(update.get("approval_status"), Some(&json!("approved")));
        assert!(broker.pending_requests().await.is_empty());
    }

    #[tokio::test]
    async fn respond_deny() {
        let broker = ApprovalBroker::new();
        let action = PendingAction::new("process_refund", json!({}), "s");
        let id = action.id.clone();

        let rx = broker.request(action).await;
        assert!(broker.respond(&id, ApprovalDecision::denied("too risky")).await);

        match rx.await.unwrap() {
            ApprovalDecision::Denied { reason } => assert_eq!(reason, "too risky"),
            other => panic!("expected Denied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn respond_unknown_id() {
        let broker = ApprovalBroker::new();
        assert!(!broker.respond("nonexistent", ApprovalDecision::Approved).await);
    }

    #[tokio::test]
    async fn closed_channel_is_denial() {
        let broker = Arc::new(ApprovalBroker::new());
        let action = PendingAction::new("process_refund", json!({}), "s");
        let id = action.id.clone();

        let deciding = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.decide(action).await })
        };
        while !broker.cancel(&id).await {
            tokio::task::yield_now().await;
        }

        assert_eq!(deciding.await.unwrap(), ApprovalDecision::denied(CHANNEL_CLOSED));
    }

    #[tokio::test]
    async fn timeout_is_denial() {
        let broker = ApprovalBroker::new().with_timeout(Duration::from_millis(10));
        let decision = broker
            .decide(PendingAction::new("process_refund", json!({}), "s"))
            .await;

        assert!(matches!(decision, ApprovalDecision::Denied { ref reason } if reason.starts_with("approval timed out")));
        assert!(broker.pending_requests().await.is_empty());
    }
}
