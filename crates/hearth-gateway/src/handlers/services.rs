//! Service invocation and discovery endpoints.

use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use hearth_kernel::model::AttrMap;
use hearth_kernel::registry::ServiceResult;
use serde_json::Value;

/// Target ids from a service payload: `entity_id` (scalar or list) at the
/// top level or under `target`, the way HA clients send them.
pub(crate) fn extract_targets(data: &Value) -> Vec<String> {
    let raw = data
        .get("entity_id")
        .or_else(|| data.get("target").and_then(|t| t.get("entity_id")));
    match raw {
        Some(Value::String(id)) => vec![id.clone()],
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn data_map(data: &Value) -> AttrMap {
    data.as_object().cloned().unwrap_or_default()
}

/// `POST /api/services/{domain}/{service}` — dispatch to the owning
/// engine; always answers with the per-target result list.
pub async fn call_service(
    State(state): State<AppState>,
    Path((domain, service)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Json<Vec<ServiceResult>> {
    let data = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let targets = extract_targets(&data);
    let results =
        state
            .simulator
            .registry()
            .call_service(&domain, &service, &targets, &data_map(&data));
    Json(results)
}

/// `GET /api/services` — full service schema for discovery.
pub async fn get_services(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.simulator.registry().services_schema()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn targets_from_scalar_list_and_target_block() {
        assert_eq!(
            extract_targets(&json!({"entity_id": "light.a"})),
            vec!["light.a"]
        );
        assert_eq!(
            extract_targets(&json!({"entity_id": ["light.a", "light.b"]})),
            vec!["light.a", "light.b"]
        );
        assert_eq!(
            extract_targets(&json!({"target": {"entity_id": ["light.c"]}})),
            vec!["light.c"]
        );
        assert!(extract_targets(&json!({"brightness": 10})).is_empty());
        assert!(extract_targets(&Value::Null).is_empty());
    }
}
