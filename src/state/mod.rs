//! Persisted runtime state: document types, schema migration, and the file-backed store

pub mod migrations;
pub mod model;
pub mod store;

pub use model::{
    Debate, DebateStage, ModelChainEntry, OwnerStatus, Pipeline, RoleActivity, RoleState,
    RuntimeKnobs, RuntimeState, Task, TaskMetadata, TaskStatus, TeamStatus,
    STATE_SCHEMA_VERSION, SUPPORTED_BACKENDS,
};
pub use store::StateStore;

use std::path::Path;
use thiserror::Error;

/// State document errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State file I/O failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is not valid JSON: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid state document: {message}")]
    InvalidDocument { message: String },
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn decode(path: &Path, source: serde_json::Error) -> Self {
        Self::Decode {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn invalid_document<S: Into<String>>(message: S) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }
}
