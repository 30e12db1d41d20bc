// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Loaded from YAML; every key is optional. `KINETIC_*` environment
//! variables override file values.
//!
//! ```yaml
//! max_iterations: 25
//! breaker:
//!   failure_threshold: 5
//!   timeout_secs: 60
//! retry:
//!   max_attempts: 3
//!   base_delay_ms: 1000
//!   max_delay_ms: 8000
//! checkpoint:
//!   path: ./data/checkpoints.db
//! approval:
//!   timeout_secs: 300
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adk::error::KineticError;
use crate::adk::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::kinetic::workflow::approval::ApprovalBroker;
use crate::kinetic::workflow::checkpoint::{
    CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
};

pub const ENV_MAX_ITERATIONS: &str = "KINETIC_MAX_ITERATIONS";
pub const ENV_CHECKPOINT_PATH: &str = "KINETIC_CHECKPOINT_PATH";

/// Top-level engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Step ceiling for a single run
    pub max_iterations: usize,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub checkpoint: CheckpointSettings,
    pub approval: ApprovalSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    /// SQLite file; checkpoints stay in memory when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Pending approvals are denied after this long
    pub timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            checkpoint: CheckpointSettings::default(),
            approval: ApprovalSettings::default(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 60,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: None,
        }
    }
}

impl EngineConfig {
    /// Load a config file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KineticError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            KineticError::config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let mut config: EngineConfig = serde_yaml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, KineticError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML without touching the environment
    pub fn from_yaml(content: &str) -> Result<Self, KineticError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KINETIC_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), KineticError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            self.max_iterations = raw.trim().parse().map_err(|_| {
                KineticError::config(format!("{} must be a positive integer, got '{}'", ENV_MAX_ITERATIONS, raw))
            })?;
            log::debug!("max_iterations overridden to {}", self.max_iterations);
        }
        if let Some(raw) = lookup(ENV_CHECKPOINT_PATH) {
            if !raw.trim().is_empty() {
                self.checkpoint.path = Some(PathBuf::from(raw.trim()));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), KineticError> {
        if self.max_iterations == 0 {
            return Err(KineticError::config("max_iterations must be at least 1"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(KineticError::config("breaker.failure_threshold must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(KineticError::config("retry.max_attempts must be at least 1"));
        }
        if let Some(max) = self.retry.max_delay_ms {
            if max < self.retry.base_delay_ms {
                return Err(KineticError::config(
                    "retry.max_delay_ms must not be below retry.base_delay_ms",
                ));
            }
        }
        Ok(())
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            timeout: Duration::from_secs(self.breaker.timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        );
        match self.retry.max_delay_ms {
            Some(max) => policy.with_max_delay(Duration::from_millis(max)),
            None => policy,
        }
    }

    /// SQLite store when a path is configured, in-memory otherwise
    pub fn open_store(&self) -> Result<Arc<dyn CheckpointStore>, KineticError> {
        match &self.checkpoint.path {
            Some(path) => Ok(Arc::new(SqliteCheckpointStore::open(path)?)),
            None => Ok(Arc::new(MemoryCheckpointStore::new())),
        }
    }

    pub fn approval_broker(&self) -> ApprovalBroker {
        match self.approval.timeout_secs {
            Some(secs) => ApprovalBroker::new().with_timeout(Duration::from_secs(secs)),
            None => ApprovalBroker::new(),
        }
    }
}
