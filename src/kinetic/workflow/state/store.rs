// SPDX-License-Identifier: MIT

//! Runtime state storage for workflow execution

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::schema::{ReducerType, StateSchema};
use crate::adk::error::GraphError;

/// A partial update returned by a node.
///
/// Writes are applied in order; the schema decides whether each one
/// overwrites or appends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    writes: Vec<(String, Value)>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a write for `field`
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.writes.push((field.into(), value.into()));
        self
    }

    /// Same as `set`; reads better for append fields
    pub fn append(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value)
    }

    /// Add every write from `other` after this update's writes
    pub fn merge(mut self, other: StateUpdate) -> Self {
        self.writes.extend(other.writes);
        self
    }

    /// Build an update from a JSON object, one write per key
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                writes: map.into_iter().collect(),
            }),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.writes.iter().map(|(k, _)| k.as_str())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.writes.iter().rev().find(|(k, _)| k == field).map(|(_, v)| v)
    }
}

/// Runtime workflow state with reducer support
#[derive(Debug, Clone)]
pub struct WorkflowState {
    /// Current state values
    fields: HashMap<String, Value>,
    /// Declared merge rules
    schema: Arc<StateSchema>,
}

impl WorkflowState {
    /// Create a new WorkflowState from a schema, seeded with its defaults
    pub fn new(schema: Arc<StateSchema>) -> Self {
        let mut fields = HashMap::new();

        for (name, def) in &schema.fields {
            if let Some(default) = &def.default {
                fields.insert(name.clone(), default.clone());
            } else if def.reducer == ReducerType::Append {
                fields.insert(name.clone(), Value::Array(vec![]));
            }
        }

        Self { fields, schema }
    }

    /// Rebuild state from a persisted snapshot.
    ///
    /// Declared fields missing from the snapshot get their defaults; snapshot
    /// fields the schema no longer declares are dropped.
    pub fn from_snapshot(schema: Arc<StateSchema>, snapshot: Map<String, Value>) -> Self {
        let mut state = Self::new(schema);
        for (name, value) in snapshot {
            if state.schema.contains(&name) {
                state.fields.insert(name, value);
            } else {
                log::warn!("Dropping undeclared field '{}' from snapshot", name);
            }
        }
        state
    }

    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Update a single field using its declared reducer
    pub fn update(&mut self, key: &str, value: Value) -> Result<(), GraphError> {
        let reducer = self.check_write(key, &value, "update")?;
        self.merge_field(key, reducer, value);
        Ok(())
    }

    /// Apply a node's partial update.
    ///
    /// Every write is checked against the schema (declared, and of the
    /// declared type) before anything is merged, so a rejected update leaves
    /// the state untouched.
    pub fn apply(&mut self, update: &StateUpdate, writer: &str) -> Result<(), GraphError> {
        let mut reducers = Vec::with_capacity(update.writes.len());
        for (key, value) in &update.writes {
            reducers.push(self.check_write(key, value, writer)?);
        }

        for ((key, value), reducer) in update.writes.iter().zip(reducers) {
            self.merge_field(key, reducer, value.clone());
        }
        Ok(())
    }

    fn check_write(&self, key: &str, value: &Value, writer: &str) -> Result<ReducerType, GraphError> {
        let def = self
            .schema
            .get(key)
            .ok_or_else(|| GraphError::UndeclaredField {
                field: key.to_string(),
                writer: writer.to_string(),
            })?;
        if !def.accepts_write(value) {
            return Err(GraphError::TypeMismatch {
                field: key.to_string(),
                expected: def.describe(),
                writer: writer.to_string(),
            });
        }
        Ok(def.reducer)
    }

    fn merge_field(&mut self, key: &str, reducer: ReducerType, value: Value) {
        match reducer {
            ReducerType::Overwrite => {
                self.fields.insert(key.to_string(), value);
            }
            ReducerType::Append => {
                let arr = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Array(vec![]));
                if !arr.is_array() {
                    *arr = Value::Array(vec![]);
                }
                if let Value::Array(a) = arr {
                    match value {
                        Value::Array(new_items) => a.extend(new_items),
                        other => a.push(other),
                    }
                }
            }
        }
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a string field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    /// Get a nested field value using dot notation (e.g., "pending_action.order_id")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    /// Length of an append field (0 if unset)
    pub fn len_of(&self, key: &str) -> usize {
        self.fields
            .get(key)
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0)
    }

    /// Last item of an append field
    pub fn last_of(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).and_then(|v| v.as_array()).and_then(|a| a.last())
    }

    /// Snapshot of all fields, for persistence
    pub fn snapshot(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Convert state to JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.snapshot())
    }

    /// Get all field names
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::state::schema::FieldType;
    use serde_json::json;

    fn schema() -> Arc<StateSchema> {
        Arc::new(
            StateSchema::new()
                .overwrite("count", FieldType::Number)
                .with_default("count", 0)
                .overwrite("name", FieldType::String)
                .append("log"),
        )
    }

    #[test]
    fn test_state_with_defaults() {
        let state = WorkflowState::new(schema());

        assert_eq!(state.get("count"), Some(&json!(0)));
        assert_eq!(state.get("log"), Some(&json!([])));
        assert!(state.get("name").is_none());
    }

    #[test]
    fn test_overwrite_reducer() {
        let mut state = WorkflowState::new(schema());

        state.update("name", json!("first")).unwrap();
        assert_eq!(state.get_str("name"), Some("first"));

        state.update("name", json!("second")).unwrap();
        assert_eq!(state.get_str("name"), Some("second"));
    }

    #[test]
    fn test_append_reducer() {
        let mut state = WorkflowState::new(schema());

        state.update("log", json!("item1")).unwrap();
        state.update("log", json!("item2")).unwrap();
        state.update("log", json!(["item3", "item4"])).unwrap();
        assert_eq!(
            state.get("log"),
            Some(&json!(["item1", "item2", "item3", "item4"]))
        );
        assert_eq!(state.len_of("log"), 4);
        assert_eq!(state.last_of("log"), Some(&json!("item4")));
    }

    #[test]
    fn test_three_step_merge() {
        let mut state = WorkflowState::new(schema());

        state.apply(&StateUpdate::new().set("count", 1), "a").unwrap();
        state.apply(&StateUpdate::new().set("count", 2), "b").unwrap();
        state.apply(&StateUpdate::new().set("log", "x"), "c").unwrap();

        assert_eq!(state.get("count"), Some(&json!(2)));
        assert_eq!(state.get("log"), Some(&json!(["x"])));
    }

    #[test]
    fn test_undeclared_field_rejected_atomically() {
        let mut state = WorkflowState::new(schema());
        let update = StateUpdate::new().set("count", 5).set("mood", "happy");

        let err = state.apply(&update, "agent").unwrap_err();
        match err {
            GraphError::UndeclaredField { field, writer } => {
                assert_eq!(field, "mood");
                assert_eq!(writer, "agent");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // count was not written either
        assert_eq!(state.get("count"), Some(&json!(0)));
        assert!(state.update("mood", json!("sad")).is_err());
    }

    #[test]
    fn test_type_mismatch_rejected_atomically() {
        let schema = Arc::new(
            StateSchema::new()
                .overwrite("count", FieldType::Number)
                .with_default("count", 0)
                .append_of("scores", FieldType::Number),
        );
        let mut state = WorkflowState::new(schema);

        let update = StateUpdate::new().set("count", 3).set("count", "three");
        let err = state.apply(&update, "agent").unwrap_err();
        assert!(matches!(
            err,
            GraphError::TypeMismatch { ref field, ref expected, ref writer }
                if field == "count" && expected == "number" && writer == "agent"
        ));
        assert_eq!(state.get("count"), Some(&json!(0)));

        let err = state
            .apply(&StateUpdate::new().append("scores", json!([0.5, "high"])), "judge")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "field 'scores' written by 'judge' expects array of number"
        );
        assert_eq!(state.len_of("scores"), 0);

        // null clears an overwrite field of any type
        state.apply(&StateUpdate::new().set("count", Value::Null), "agent").unwrap();
        state.apply(&StateUpdate::new().append("scores", 0.5), "judge").unwrap();
        assert_eq!(state.get("scores"), Some(&json!([0.5])));
        assert!(state.update("count", json!(true)).is_err());
    }

    #[test]
    fn test_get_path() {
        let schema = Arc::new(StateSchema::new().overwrite("result", FieldType::Object).append("items"));
        let mut state = WorkflowState::new(schema);
        state.update("result", json!({"data": {"value": 42}})).unwrap();
        state.update("items", json!({"id": "a"})).unwrap();

        assert_eq!(state.get_path("result.data"), Some(&json!({"value": 42})));
        assert_eq!(state.get_path("result.data.value"), Some(&json!(42)));
        assert_eq!(state.get_path("result.nonexistent"), None);
        assert_eq!(state.get_path("items.0.id"), Some(&json!("a")));
    }

    #[test]
    fn test_snapshot_round_trip_drops_unknown_fields() {
        let mut state = WorkflowState::new(schema());
        state.update("log", json!("kept")).unwrap();

        let mut snapshot = state.snapshot();
        snapshot.insert("legacy".to_string(), json!(true));

        let restored = WorkflowState::from_snapshot(schema(), snapshot);
        assert_eq!(restored.get("log"), Some(&json!(["kept"])));
        assert!(restored.get("legacy").is_none());
    }

    #[test]
    fn test_update_from_json() {
        let update = StateUpdate::from_json(json!({"count": 3, "log": ["a"]})).unwrap();
        assert!(!update.is_empty());
        assert_eq!(update.get("count"), Some(&json!(3)));
        assert!(StateUpdate::from_json(json!("not an object")).is_none());
    }
}
