// SPDX-License-Identifier: MIT

use crate::adk::error::ResourceError;
use crate::adk::resilience::{CircuitBreakerRegistry, ResourceKey, RetryPolicy};
use crate::adk::tool::Tool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.write().await;
        tools.insert(tool.name().to_string(), tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub async fn names(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Call a tool through its circuit breaker, retrying transient failures.
    ///
    /// The breaker wraps the whole retry sequence and is keyed by tool name,
    /// so one exhausted sequence counts as one breaker failure and an open
    /// circuit is never retried.
    pub async fn call_guarded(
        &self,
        name: &str,
        args: Value,
        breakers: &CircuitBreakerRegistry,
        retry: &RetryPolicy,
    ) -> Result<Value, ResourceError> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| ResourceError::fatal(name, "tool is not registered"))?;
        let key = ResourceKey::new(name);

        breakers
            .call(&key, || retry.run(|| tool.execute(args.clone())))
            .await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
