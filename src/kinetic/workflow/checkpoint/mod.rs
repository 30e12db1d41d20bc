// SPDX-License-Identifier: MIT

//! Checkpoint persistence for graph sessions
//!
//! A checkpoint holds the latest merged state of one session, keyed by the
//! session key. Stores keep exactly one snapshot per key and overwrite it
//! after every executor step.

mod locks;
mod memory;
mod sqlite;

pub use locks::{SessionGuard, SessionLocks};
pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::adk::error::StoreError;

/// Latest persisted snapshot of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_key: String,
    /// Merged state fields
    pub state: Map<String, Value>,
    /// Cumulative number of steps executed across every run of the session
    pub iteration: u64,
    /// Node the session last executed
    pub last_node: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(session_key: impl Into<String>, state: Map<String, Value>, iteration: u64) -> Self {
        Self {
            session_key: session_key.into(),
            state,
            iteration,
            last_node: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_last_node(mut self, node: Option<String>) -> Self {
        self.last_node = node;
        self
    }
}

/// Storage backend for checkpoints
pub trait CheckpointStore: Send + Sync {
    fn load(&self, session_key: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Insert or replace the checkpoint for its session key
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Remove a session's checkpoint. Returns whether one existed.
    fn delete(&self, session_key: &str) -> Result<bool, StoreError>;

    /// Stored session keys, sorted
    fn list_sessions(&self) -> Result<Vec<String>, StoreError>;

    /// Per-session locks that every executor on this store serializes on
    fn session_locks(&self) -> &SessionLocks;
}
