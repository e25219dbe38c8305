//! Entity state endpoints: discovery, reads, test writes, and history.

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use hearth_kernel::model::{AttrMap, StateContext};
use serde::Deserialize;
use serde_json::{Value, json};

/// `GET /api/` — discovery.
pub async fn api_discovery() -> Json<Value> {
    Json(json!({
        "message": "API running.",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /api/config` — Home-Assistant-shaped instance configuration.
pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "location_name": "Hearth Simulator",
        "latitude": 40.7128,
        "longitude": -74.0060,
        "elevation": 0,
        "unit_system": {
            "length": "km",
            "mass": "g",
            "temperature": "°C",
            "volume": "L",
        },
        "time_zone": "UTC",
        "components": state.simulator.store().domains(),
        "version": "2024.1.0",
        "state": "RUNNING",
    }))
}

/// `GET /api/states` — every entity, wire form.
pub async fn get_states(State(state): State<AppState>) -> Json<Vec<Value>> {
    let states = state
        .simulator
        .store()
        .get_all_states()
        .iter()
        .map(|s| s.wire_json())
        .collect();
    Json(states)
}

/// `GET /api/states/{entity_id}` — one entity or 404.
pub async fn get_state(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> GatewayResult<Json<Value>> {
    state
        .simulator
        .store()
        .get_state(&entity_id)
        .map(|s| Json(s.wire_json()))
        .ok_or(GatewayError::EntityNotFound(entity_id))
}

#[derive(Debug, Deserialize)]
pub struct StateUpdateBody {
    pub state: String,
    #[serde(default)]
    pub attributes: Option<AttrMap>,
}

/// `POST /api/states/{entity_id}` — direct store write, for test
/// harnesses and debugging.
pub async fn set_state(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(body): Json<StateUpdateBody>,
) -> GatewayResult<Json<Value>> {
    let written = state.simulator.store().set_state_with(
        &entity_id,
        &body.state,
        body.attributes.unwrap_or_default(),
        Some(StateContext::new()),
        false,
    )?;
    Ok(Json(written.wire_json()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub filter_entity_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

fn parse_rfc3339(field: &str, value: &Option<String>) -> GatewayResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse::<DateTime<Utc>>()
            .map(Some)
            .map_err(|_| GatewayError::InvalidRequest(format!("bad {field} timestamp: {raw:?}"))),
    }
}

/// `GET /api/history/period` — per-entity history filtered by
/// `last_updated` bounds.
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> GatewayResult<Json<Value>> {
    let start = parse_rfc3339("start_time", &query.start_time)?;
    let end = parse_rfc3339("end_time", &query.end_time)?;
    let store = state.simulator.store();

    let entity_ids: Vec<String> = match &query.filter_entity_id {
        Some(id) => {
            if store.get_state(id).is_none() {
                return Err(GatewayError::EntityNotFound(id.clone()));
            }
            vec![id.clone()]
        }
        None => store
            .get_all_states()
            .iter()
            .map(|s| s.entity_id.clone())
            .collect(),
    };

    let mut result = serde_json::Map::new();
    for entity_id in entity_ids {
        let entries = store.get_history(&entity_id, start, end)?;
        if !entries.is_empty() {
            result.insert(
                entity_id,
                Value::Array(entries.iter().map(|s| s.wire_json()).collect()),
            );
        }
    }
    Ok(Json(Value::Object(result)))
}
