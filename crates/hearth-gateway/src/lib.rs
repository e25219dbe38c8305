//! Hearth gateway — the HTTP surface over the simulation kernel.
//!
//! Thin adapters only: every handler reads through the store, dispatches
//! through the service registry, or controls the clock. Change
//! notification reaches HTTP consumers through a single store listener
//! republishing onto a broadcast channel ([`events::EventBridge`]), which
//! SSE streams and WebSocket sessions subscribe to.
//!
//! See [`server::ApiServer`] for the endpoint table.

pub mod error;
pub mod events;
pub mod handlers;
pub mod server;
pub mod state;
pub mod ws;

pub use error::{GatewayError, GatewayResult};
pub use events::EventBridge;
pub use server::{ApiServer, ApiServerConfig};
pub use state::AppState;
