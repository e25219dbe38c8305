//! Entity state model and change-event wire forms.
//!
//! [`EntityState`] is an immutable value: the store hands out
//! `Arc<EntityState>` and writes produce a fresh record, so readers can
//! share the stored allocation without defensive deep copies.

use crate::error::{KernelError, KernelResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Ordered attribute map attached to an entity state.
///
/// `serde_json` is built with `preserve_order`, so iteration follows
/// insertion order and round-trips stably onto the wire.
pub type AttrMap = serde_json::Map<String, Value>;

/// Split a `<domain>.<name>` entity id, validating both halves.
///
/// Stored ids contain exactly one `.` with a non-empty domain and name.
pub fn split_entity_id(entity_id: &str) -> KernelResult<(&str, &str)> {
    match entity_id.split_once('.') {
        Some((domain, name))
            if !domain.is_empty() && !name.is_empty() && !name.contains('.') =>
        {
            Ok((domain, name))
        }
        _ => Err(KernelError::invalid(format!(
            "entity id must be <domain>.<name>, got {entity_id:?}"
        ))),
    }
}

/// Domain prefix of an entity id, if it has one.
pub fn domain_of(entity_id: &str) -> Option<&str> {
    split_entity_id(entity_id).ok().map(|(domain, _)| domain)
}

/// Origin metadata attached to a state write. Opaque to the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateContext {
    pub id: String,
    pub parent_id: Option<String>,
    pub user_id: Option<String>,
}

impl StateContext {
    /// Fresh context with a random id and no parent or user.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            parent_id: None,
            user_id: None,
        }
    }
}

impl Default for StateContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A single entity state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Case-sensitive `<domain>.<name>` identifier.
    pub entity_id: String,
    /// Short opaque state string (`on`, `off`, `heat`, a stringified number).
    pub state: String,
    /// Ordered attribute map.
    #[serde(default)]
    pub attributes: AttrMap,
    /// Simulated timestamp of the last change in `state` or `attributes`.
    pub last_changed: DateTime<Utc>,
    /// Simulated timestamp of the last accepted write, changed or not.
    pub last_updated: DateTime<Utc>,
    /// Origin context of the write, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<StateContext>,
}

impl EntityState {
    /// Domain prefix of this entity's id.
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }

    /// Attribute lookup.
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Numeric attribute coerced to `f64` (accepts numbers and numeric
    /// strings, the way sensor states are stored).
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// The state string parsed as a number, for sensor-style entities.
    pub fn state_f64(&self) -> Option<f64> {
        self.state.parse().ok()
    }

    /// Home-Assistant-compatible JSON form: timestamps as RFC 3339, the
    /// context always present.
    pub fn wire_json(&self) -> Value {
        json!({
            "entity_id": self.entity_id,
            "state": self.state,
            "attributes": Value::Object(self.attributes.clone()),
            "last_changed": self.last_changed.to_rfc3339_opts(SecondsFormat::Micros, true),
            "last_updated": self.last_updated.to_rfc3339_opts(SecondsFormat::Micros, true),
            "context": self.context.clone().unwrap_or_else(|| StateContext {
                id: String::new(),
                parent_id: None,
                user_id: None,
            }),
        })
    }
}

/// A committed state change, delivered synchronously to store listeners.
#[derive(Debug, Clone)]
pub struct StateChangedEvent {
    /// Monotonic per-store sequence number; lets downstream consumers
    /// detect reordering after the event leaves the store lock.
    pub seq: u64,
    pub entity_id: String,
    /// Prior record, absent on the first write for the entity.
    pub old_state: Option<Arc<EntityState>>,
    pub new_state: Arc<EntityState>,
    /// Simulated time at which the write committed.
    pub time_fired: DateTime<Utc>,
}

impl StateChangedEvent {
    /// Home-Assistant-compatible `state_changed` event envelope.
    pub fn wire_json(&self) -> Value {
        json!({
            "event_type": "state_changed",
            "data": {
                "entity_id": self.entity_id,
                "old_state": self.old_state.as_ref().map(|s| s.wire_json()),
                "new_state": self.new_state.wire_json(),
            },
            "origin": "LOCAL",
            "time_fired": self.time_fired.to_rfc3339_opts(SecondsFormat::Micros, true),
        })
    }
}
