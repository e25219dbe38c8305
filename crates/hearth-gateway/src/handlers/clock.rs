//! Simulation control endpoints (not part of the HA surface).

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

fn clock_info(state: &AppState) -> Value {
    let clock = state.simulator.clock();
    json!({
        "current_time": clock.now().to_rfc3339(),
        "speed": clock.speed(),
        "paused": clock.is_paused(),
    })
}

/// `GET /api/simulator/clock`.
pub async fn get_clock(State(state): State<AppState>) -> Json<Value> {
    Json(clock_info(&state))
}

#[derive(Debug, Deserialize)]
pub struct SetTimeBody {
    pub time: String,
}

/// `POST /api/simulator/clock/set_time`.
pub async fn set_time(
    State(state): State<AppState>,
    Json(body): Json<SetTimeBody>,
) -> GatewayResult<Json<Value>> {
    let target: DateTime<Utc> = body
        .time
        .parse()
        .map_err(|_| GatewayError::InvalidRequest(format!("bad time: {:?}", body.time)))?;
    state.simulator.clock().set_time(target);
    Ok(Json(clock_info(&state)))
}

#[derive(Debug, Deserialize)]
pub struct SetSpeedBody {
    pub speed: f64,
}

/// `POST /api/simulator/clock/set_speed`.
pub async fn set_speed(
    State(state): State<AppState>,
    Json(body): Json<SetSpeedBody>,
) -> GatewayResult<Json<Value>> {
    state.simulator.clock().set_speed(body.speed)?;
    Ok(Json(clock_info(&state)))
}

/// `POST /api/simulator/clock/pause`.
pub async fn pause(State(state): State<AppState>) -> Json<Value> {
    state.simulator.clock().pause();
    Json(clock_info(&state))
}

/// `POST /api/simulator/clock/resume`.
pub async fn resume(State(state): State<AppState>) -> Json<Value> {
    state.simulator.clock().resume();
    Json(clock_info(&state))
}

/// `GET /api/simulator/stats` — entity counts, cadence, and kernel
/// metrics.
pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.simulator.stats()).unwrap_or_default())
}
