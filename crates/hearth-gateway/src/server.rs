//! Axum-based API server.
//!
//! [`ApiServer`] wires the simulator into the HA-compatible REST,
//! SSE, and WebSocket surface.
//!
//! # Endpoints
//!
//! | Method | Path                                | Description                         |
//! |--------|-------------------------------------|-------------------------------------|
//! | `GET`  | `/api/`                             | Discovery                           |
//! | `GET`  | `/api/config`                       | Instance configuration              |
//! | `GET`  | `/api/states`                       | All entity states                   |
//! | `GET`  | `/api/states/{entity_id}`           | One entity state                    |
//! | `POST` | `/api/states/{entity_id}`           | Direct state write (test surface)   |
//! | `POST` | `/api/services/{domain}/{service}`  | Service call, per-target results    |
//! | `GET`  | `/api/services`                     | Service schema                      |
//! | `GET`  | `/api/history/period`               | Bounded per-entity history          |
//! | `GET`  | `/api/events`                       | SSE change stream                   |
//! | `GET`  | `/api/websocket`                    | HA WebSocket session                |
//! | `GET`  | `/api/simulator/clock`              | Clock info                          |
//! | `POST` | `/api/simulator/clock/set_time`     | Jump simulated time                 |
//! | `POST` | `/api/simulator/clock/set_speed`    | Change acceleration                 |
//! | `POST` | `/api/simulator/clock/pause`        | Freeze the clock                    |
//! | `POST` | `/api/simulator/clock/resume`       | Resume the clock                    |
//! | `GET`  | `/api/simulator/stats`              | Stats + kernel metrics              |
//! | `GET`  | `/health`                           | Liveness probe                      |

use crate::error::{GatewayError, GatewayResult};
use crate::handlers;
use crate::state::AppState;
use crate::ws;
use axum::Router;
use axum::routing::{get, post};
use hearth_behaviors::simulator::Simulator;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Runtime configuration for [`ApiServer`].
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8123,
        }
    }
}

/// HTTP/WebSocket surface over a running [`Simulator`].
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, simulator: Arc<Simulator>) -> Self {
        Self {
            config,
            state: AppState::new(simulator),
        }
    }

    /// Build the axum router. Exposed separately so tests can drive the
    /// app without binding a socket.
    pub fn build_app(&self) -> Router {
        Router::new()
            .route("/api/", get(handlers::states::api_discovery))
            .route("/api/config", get(handlers::states::get_config))
            .route("/api/states", get(handlers::states::get_states))
            .route(
                "/api/states/{entity_id}",
                get(handlers::states::get_state).post(handlers::states::set_state),
            )
            .route(
                "/api/services/{domain}/{service}",
                post(handlers::services::call_service),
            )
            .route("/api/services", get(handlers::services::get_services))
            .route("/api/history/period", get(handlers::states::get_history))
            .route("/api/events", get(handlers::stream::event_stream))
            .route("/api/websocket", get(ws::websocket))
            .route("/api/simulator/clock", get(handlers::clock::get_clock))
            .route(
                "/api/simulator/clock/set_time",
                post(handlers::clock::set_time),
            )
            .route(
                "/api/simulator/clock/set_speed",
                post(handlers::clock::set_speed),
            )
            .route("/api/simulator/clock/pause", post(handlers::clock::pause))
            .route("/api/simulator/clock/resume", post(handlers::clock::resume))
            .route("/api/simulator/stats", get(handlers::clock::stats))
            .route("/health", get(handlers::health::health))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until `ctrl-c`.
    pub async fn start(&self) -> GatewayResult<()> {
        let app = self.build_app();
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::Internal(format!("bind {addr}: {e}")))?;
        info!(%addr, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
