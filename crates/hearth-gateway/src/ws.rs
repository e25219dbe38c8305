//! Home-Assistant-compatible WebSocket session.
//!
//! Flow: the server sends `auth_required`, the client answers with
//! `auth` (any token is accepted; this is a simulator), then commands
//! are served until the socket closes. `subscribe_events` registers the
//! session on the shared event bridge; state changes are pushed as HA
//! `event` frames tagged with the subscription id.

use crate::handlers::services::{data_map, extract_targets};
use crate::state::AppState;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

const HA_VERSION: &str = "2024.1.0";

/// `GET /api/websocket` — upgrade and run one session.
pub async fn websocket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session(socket, state))
}

struct Session {
    authenticated: bool,
    /// Subscription ids registered via `subscribe_events`.
    subscriptions: HashSet<i64>,
}

async fn session(socket: WebSocket, state: AppState) {
    let (mut sink, mut inbound) = socket.split();
    let mut events = state.events.subscribe();
    let mut session = Session {
        authenticated: false,
        subscriptions: HashSet::new(),
    };

    let hello = json!({"type": "auth_required", "ha_version": HA_VERSION});
    if send(&mut sink, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = inbound.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!(%err, "websocket receive failed");
                        break;
                    }
                };
                let message: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(_) => {
                        warn!("ignoring non-JSON websocket frame");
                        continue;
                    }
                };
                for reply in handle_message(&state, &mut session, &message) {
                    if send(&mut sink, &reply).await.is_err() {
                        return;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) if session.authenticated && !session.subscriptions.is_empty() => {
                        let payload = event.wire_json();
                        for subscription in &session.subscriptions {
                            let frame = json!({
                                "id": subscription,
                                "type": "event",
                                "event": payload,
                            });
                            if send(&mut sink, &frame).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "websocket session lagged; skipping events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    debug!("websocket session closed");
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    payload: &Value,
) -> Result<(), axum::Error> {
    sink.send(Message::Text(payload.to_string().into())).await
}

fn result_frame(id: Option<&Value>, result: Value) -> Value {
    json!({
        "id": id.cloned().unwrap_or(Value::Null),
        "type": "result",
        "success": true,
        "result": result,
    })
}

fn handle_message(state: &AppState, session: &mut Session, message: &Value) -> Vec<Value> {
    let msg_type = message.get("type").and_then(Value::as_str).unwrap_or("");
    let msg_id = message.get("id");

    if msg_type == "auth" {
        // Simulation: any presented token authenticates.
        session.authenticated = true;
        return vec![json!({"type": "auth_ok", "ha_version": HA_VERSION})];
    }
    if !session.authenticated {
        return vec![json!({
            "type": "auth_invalid",
            "message": "Authentication required",
        })];
    }

    match msg_type {
        "ping" => vec![json!({"id": msg_id.cloned().unwrap_or(Value::Null), "type": "pong"})],
        "get_states" => {
            let states: Vec<Value> = state
                .simulator
                .store()
                .get_all_states()
                .iter()
                .map(|s| s.wire_json())
                .collect();
            vec![result_frame(msg_id, Value::Array(states))]
        }
        "get_config" => vec![result_frame(
            msg_id,
            json!({
                "location_name": "Hearth Simulator",
                "latitude": 40.7128,
                "longitude": -74.0060,
                "unit_system": {"temperature": "°C"},
                "time_zone": "UTC",
                "version": HA_VERSION,
            }),
        )],
        "get_services" => {
            let schema =
                serde_json::to_value(state.simulator.registry().services_schema())
                    .unwrap_or_default();
            vec![result_frame(msg_id, schema)]
        }
        "call_service" => {
            let domain = message.get("domain").and_then(Value::as_str).unwrap_or("");
            let service = message.get("service").and_then(Value::as_str).unwrap_or("");
            // entity ids may ride in `target` or in `service_data`.
            let mut targets = extract_targets(message);
            let data = message.get("service_data").cloned().unwrap_or(Value::Null);
            if targets.is_empty() {
                targets = extract_targets(&data);
            }
            let results = state
                .simulator
                .registry()
                .call_service(domain, service, &targets, &data_map(&data));
            vec![result_frame(
                msg_id,
                serde_json::to_value(results).unwrap_or_default(),
            )]
        }
        "subscribe_events" => {
            if let Some(id) = msg_id.and_then(Value::as_i64) {
                session.subscriptions.insert(id);
            }
            vec![result_frame(msg_id, Value::Null)]
        }
        "unsubscribe_events" => {
            if let Some(subscription) = message.get("subscription").and_then(Value::as_i64) {
                session.subscriptions.remove(&subscription);
            }
            vec![result_frame(msg_id, Value::Null)]
        }
        other => {
            warn!(message_type = other, "unknown websocket command");
            vec![json!({
                "id": msg_id.cloned().unwrap_or(Value::Null),
                "type": "result",
                "success": false,
                "error": {"code": "unknown_command", "message": format!("unknown command: {other}")},
            })]
        }
    }
}
