// SPDX-License-Identifier: MIT

//! State schema definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::adk::error::GraphError;

/// Schema defining the workflow state structure
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct StateSchema {
    /// Field definitions
    #[serde(flatten)]
    pub fields: HashMap<String, StateFieldDef>,
}

/// Definition of a single state field
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StateFieldDef {
    /// Type of the field
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Reducer for merging values
    #[serde(default)]
    pub reducer: ReducerType,
    /// Default value
    pub default: Option<Value>,
    /// Element type of an append field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<FieldType>,
}

impl StateFieldDef {
    pub fn new(field_type: FieldType, reducer: ReducerType) -> Self {
        Self {
            field_type,
            reducer,
            default: None,
            items: None,
        }
    }

    pub fn with_items(mut self, item_type: FieldType) -> Self {
        self.items = Some(item_type);
        self
    }

    /// Whether one write fits this field. Append writes are checked item by
    /// item against `items`, a bare value counting as a single item.
    pub fn accepts_write(&self, value: &Value) -> bool {
        match self.reducer {
            ReducerType::Overwrite => self.field_type.accepts(value),
            ReducerType::Append => {
                let items = self.items.unwrap_or(FieldType::Any);
                match value {
                    Value::Array(values) => values.iter().all(|v| items.accepts(v)),
                    other => items.accepts(other),
                }
            }
        }
    }

    /// Human-readable type, e.g. `number` or `array of string`
    pub fn describe(&self) -> String {
        match (self.reducer, self.items) {
            (ReducerType::Append, Some(items)) => format!("array of {}", items),
            _ => self.field_type.to_string(),
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Supported field types
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Any JSON value
    Any,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }

    /// Whether `value` fits this type. `null` fits every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldType::Any, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reducer types for merging values into state
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Replace the value (default)
    #[default]
    Overwrite,
    /// Append to array, in execution order
    Append,
}

impl ReducerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReducerType::Overwrite => "overwrite",
            ReducerType::Append => "append",
        }
    }
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field definition
    pub fn field(mut self, name: impl Into<String>, def: StateFieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Add an overwrite field of the given type
    pub fn overwrite(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field(name, StateFieldDef::new(field_type, ReducerType::Overwrite))
    }

    /// Add an append-only array field starting empty
    pub fn append(self, name: impl Into<String>) -> Self {
        self.field(
            name,
            StateFieldDef::new(FieldType::Array, ReducerType::Append).with_default(Value::Array(vec![])),
        )
    }

    /// Add an append-only array field whose items must be `item_type`
    pub fn append_of(self, name: impl Into<String>, item_type: FieldType) -> Self {
        self.field(
            name,
            StateFieldDef::new(FieldType::Array, ReducerType::Append)
                .with_default(Value::Array(vec![]))
                .with_items(item_type),
        )
    }

    /// Set the default of an already declared field
    pub fn with_default(mut self, name: &str, value: impl Into<Value>) -> Self {
        if let Some(def) = self.fields.get_mut(name) {
            def.default = Some(value.into());
        }
        self
    }

    /// Parse and validate a schema from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, GraphError> {
        let schema: StateSchema =
            serde_yaml::from_str(yaml).map_err(|e| GraphError::InvalidSchema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Merge rule for a field, if declared
    pub fn reducer(&self, name: &str) -> Option<ReducerType> {
        self.fields.get(name).map(|def| def.reducer)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&StateFieldDef> {
        self.fields.get(name)
    }

    /// Check that append fields are arrays and defaults match their types
    pub fn validate(&self) -> Result<(), GraphError> {
        for (name, def) in &self.fields {
            if def.reducer == ReducerType::Append
                && !matches!(def.field_type, FieldType::Array | FieldType::Any)
            {
                return Err(GraphError::InvalidSchema(format!(
                    "append field '{}' must be an array, found {:?}",
                    name, def.field_type
                )));
            }
            if let Some(default) = &def.default {
                if !def.field_type.accepts(default) {
                    return Err(GraphError::InvalidSchema(format!(
                        "default for '{}' does not match type {:?}",
                        name, def.field_type
                    )));
                }
                if def.reducer == ReducerType::Append && !default.is_array() {
                    return Err(GraphError::InvalidSchema(format!(
                        "default for append field '{}' must be a sequence",
                        name
                    )));
                }
                if !def.accepts_write(default) {
                    return Err(GraphError::InvalidSchema(format!(
                        "default for '{}' does not match type {}",
                        name,
                        def.describe()
                    )));
                }
            }
            if def.items.is_some() && def.reducer != ReducerType::Append {
                return Err(GraphError::InvalidSchema(format!(
                    "'{}' declares an item type but is not an append field",
                    name
                )));
            }
        }
        Ok(())
    }
}
