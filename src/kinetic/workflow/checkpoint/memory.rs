// SPDX-License-Identifier: MIT

//! In-memory checkpoint store

use std::collections::HashMap;
use std::sync::Mutex;

use super::{Checkpoint, CheckpointStore, SessionLocks};
use crate::adk::error::StoreError;

/// Checkpoint store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    locks: SessionLocks,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, session_key: &str) -> Result<Option<Checkpoint>, StoreError> {
        let checkpoints = self.checkpoints.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(checkpoints.get(session_key).cloned())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.lock().map_err(|_| StoreError::Poisoned)?;
        checkpoints.insert(checkpoint.session_key.clone(), checkpoint.clone());
        Ok(())
    }

    fn delete(&self, session_key: &str) -> Result<bool, StoreError> {
        let mut checkpoints = self.checkpoints.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(checkpoints.remove(session_key).is_some())
    }

    fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let checkpoints = self.checkpoints.lock().map_err(|_| StoreError::Poisoned)?;
        let mut keys: Vec<String> = checkpoints.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn session_locks(&self) -> &SessionLocks {
        &self.locks
    }
}
