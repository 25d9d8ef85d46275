//! Forward-only schema migration of the raw state document
//!
//! Runs on the untyped JSON before it is decoded so documents written by older
//! builds (missing collections, roles without backend fields, tasks without
//! metadata) load cleanly. Idempotent: a current document reports no change.

use super::model::{RuntimeKnobs, STATE_SCHEMA_VERSION};
use super::StoreError;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Bring `document` up to the current schema in place.
///
/// Returns `true` when anything was added or rewritten, in which case the
/// caller must persist the document immediately.
pub fn ensure_schema(
    document: &mut Value,
    role_ids: &[String],
    knobs: &RuntimeKnobs,
) -> Result<bool, StoreError> {
    let root = document
        .as_object_mut()
        .ok_or_else(|| StoreError::invalid_document("state document is not a JSON object"))?;
    let mut changed = false;

    if !root.contains_key("version") {
        root.insert("version".into(), json!(STATE_SCHEMA_VERSION));
        changed = true;
    }

    for collection in ["tasks", "pipelines", "debates"] {
        if !root.get(collection).map_or(false, Value::is_array) {
            root.insert(collection.into(), Value::Array(Vec::new()));
            changed = true;
        }
    }

    if !root.get("config").map_or(false, Value::is_object) {
        let config = serde_json::to_value(knobs)
            .map_err(|e| StoreError::invalid_document(e.to_string()))?;
        root.insert("config".into(), config);
        changed = true;
    }

    if !root.get("roles").map_or(false, Value::is_object) {
        root.insert("roles".into(), Value::Object(Map::new()));
        changed = true;
    }

    if let Some(roles) = root.get_mut("roles").and_then(Value::as_object_mut) {
        changed |= migrate_roles(roles, role_ids);
    }

    if let Some(tasks) = root.get_mut("tasks").and_then(Value::as_array_mut) {
        for task in tasks.iter_mut().filter_map(Value::as_object_mut) {
            if !task.get("metadata").map_or(false, Value::is_object) {
                task.insert("metadata".into(), Value::Object(Map::new()));
                changed = true;
            }
        }
    }

    if changed {
        debug!("State document migrated to schema v{}", STATE_SCHEMA_VERSION);
    }
    Ok(changed)
}

fn empty_role() -> Value {
    json!({
        "session_id": null,
        "session_backend": null,
        "session_model": null,
        "state": "idle",
        "last_active_at": null,
        "tasks_completed": 0,
    })
}

fn migrate_roles(roles: &mut Map<String, Value>, role_ids: &[String]) -> bool {
    let mut changed = false;

    for role in role_ids {
        if !roles.contains_key(role) {
            roles.insert(role.clone(), empty_role());
            changed = true;
        }
    }

    for record in roles.values_mut().filter_map(Value::as_object_mut) {
        for field in ["session_backend", "session_model"] {
            if !record.contains_key(field) {
                record.insert(field.into(), Value::Null);
                changed = true;
            }
        }

        let has_backend = record
            .get("session_backend")
            .and_then(Value::as_str)
            .map_or(false, |backend| !backend.trim().is_empty());
        let has_session = record
            .get("session_id")
            .map_or(false, |sid| !sid.is_null() && sid.as_str() != Some(""));

        if !has_backend && has_session {
            record.insert("session_backend".into(), json!("codex"));
            if record.get("session_model").map_or(true, Value::is_null) {
                record.insert("session_model".into(), json!(""));
            }
            changed = true;
        }
    }

    changed
}
