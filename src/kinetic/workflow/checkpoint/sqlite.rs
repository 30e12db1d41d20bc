// SPDX-License-Identifier: MIT

//! SQLite-backed checkpoint store

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{Checkpoint, CheckpointStore, SessionLocks};
use crate::adk::error::StoreError;

/// Persistent checkpoint store, one row per session key.
///
/// Session locks are per store instance; open one store per database file
/// and share it between executors.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
    locks: SessionLocks,
}

impl SqliteCheckpointStore {
    /// Open or create the checkpoint database
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        log::info!("Opened checkpoint store at {}", path.display());
        Self::init(conn)
    }

    /// Database that disappears with the store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS checkpoints (
                 session_key TEXT PRIMARY KEY,
                 state_json TEXT NOT NULL,
                 iteration INTEGER NOT NULL DEFAULT 0,
                 last_node TEXT,
                 updated_at TEXT NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            locks: SessionLocks::new(),
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&self, session_key: &str) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT state_json, iteration, last_node, updated_at
                 FROM checkpoints
                 WHERE session_key = ?1",
                params![session_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((state_json, iteration, last_node, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Checkpoint {
            session_key: session_key.to_string(),
            state: serde_json::from_str(&state_json)?,
            iteration: iteration.max(0) as u64,
            last_node,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let state_json = serde_json::to_string(&checkpoint.state)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO checkpoints (session_key, state_json, iteration, last_node, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_key) DO UPDATE SET
                 state_json = excluded.state_json,
                 iteration = excluded.iteration,
                 last_node = excluded.last_node,
                 updated_at = excluded.updated_at",
            params![
                checkpoint.session_key,
                state_json,
                checkpoint.iteration as i64,
                checkpoint.last_node,
                checkpoint.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, session_key: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let deleted = conn.execute(
            "DELETE FROM checkpoints WHERE session_key = ?1",
            params![session_key],
        )?;
        Ok(deleted > 0)
    }

    fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT session_key FROM checkpoints ORDER BY session_key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn session_locks(&self) -> &SessionLocks {
        &self.locks
    }
}
