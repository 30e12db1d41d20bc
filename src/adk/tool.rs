// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;

use crate::adk::error::ResourceError;

/// Trait for external resources that node implementations call.
///
/// # Optimization Notes
/// - `name()` and `description()` return `&str` to avoid allocation on every call
/// - `schema()` returns `&Value` to avoid cloning the schema on every access
/// - Implementations should store these values in struct fields
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool name (must be unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the tool does
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's input parameters
    fn schema(&self) -> &Value;

    /// Execute the tool with structured arguments.
    ///
    /// Failures must be classified: `ResourceError::Transient` for anything a
    /// retry might fix, `ResourceError::Fatal` otherwise.
    async fn execute(&self, input: Value) -> Result<Value, ResourceError>;
}
