//! Durable JSON state document
//!
//! The store reads the whole document, callers mutate it in memory, and `save`
//! rewrites it in full after copying the previous file to a `.last.json` backup.
//!
//! There is no file locking. Two dispatchers pointed at the same state file can
//! overwrite each other's changes; run one dispatcher at a time.

use super::migrations::ensure_schema;
use super::model::{RuntimeKnobs, RuntimeState};
use super::StoreError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    role_ids: Vec<String>,
    knobs: RuntimeKnobs,
}

impl StateStore {
    /// `role_ids` and `knobs` seed new documents and migrations
    pub fn new<P: Into<PathBuf>>(path: P, role_ids: Vec<String>, knobs: RuntimeKnobs) -> Self {
        Self {
            path: path.into(),
            role_ids,
            knobs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file holding the contents that the last save replaced
    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("last.json")
    }

    /// Load the document, creating it when absent and persisting any migration.
    ///
    /// Undecodable JSON is returned as [`StoreError::Decode`], which callers treat as fatal.
    pub fn load(&self, now: DateTime<Utc>) -> Result<RuntimeState, StoreError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "Creating new state document");
            let mut state = RuntimeState::new(&self.role_ids, self.knobs.clone(), now);
            self.save(&mut state, now)?;
            return Ok(state);
        }

        let raw = fs::read_to_string(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let mut document: Value =
            serde_json::from_str(&raw).map_err(|e| StoreError::decode(&self.path, e))?;
        let migrated = ensure_schema(&mut document, &self.role_ids, &self.knobs)?;
        let mut state: RuntimeState =
            serde_json::from_value(document).map_err(|e| StoreError::decode(&self.path, e))?;

        if migrated {
            info!(path = %self.path.display(), "State schema migrated");
            self.save(&mut state, now)?;
        }

        Ok(state)
    }

    /// Stamp `updated_at`, back up the previous file, and rewrite the document
    pub fn save(&self, state: &mut RuntimeState, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        state.updated_at = Some(now);

        if self.path.exists() {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup).map_err(|e| StoreError::io(&backup, e))?;
        }

        let mut body = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::invalid_document(e.to_string()))?;
        body.push('\n');
        fs::write(&self.path, body).map_err(|e| StoreError::io(&self.path, e))?;
        debug!(path = %self.path.display(), tasks = state.tasks.len(), "State saved");
        Ok(())
    }
}
