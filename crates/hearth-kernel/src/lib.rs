//! Hearth kernel — the live simulation core.
//!
//! The kernel carries the concurrency-sensitive pieces of the simulator:
//!
//! - [`clock::SimulationClock`] — virtual time with wall-time acceleration,
//!   jump, pause, and resume.
//! - [`store::StateStore`] — the authoritative entity-state map with
//!   bounded history and synchronous change fan-out.
//! - [`scheduler::Scheduler`] — a single worker draining a min-heap of
//!   tasks keyed on simulated time.
//! - [`registry::ServiceRegistry`] — dispatch of `(domain, service,
//!   targets, payload)` tuples to the owning [`engine::BehaviorEngine`].
//!
//! Domain behavior lives in `hearth-behaviors`; HTTP/WebSocket adapters in
//! `hearth-gateway`. Both depend on this crate, never the other way
//! around.

pub mod clock;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use clock::SimulationClock;
pub use engine::BehaviorEngine;
pub use error::{KernelError, KernelResult};
pub use metrics::{KernelMetrics, MetricsSnapshot};
pub use model::{AttrMap, EntityState, StateChangedEvent, StateContext};
pub use registry::{ServiceRegistry, ServiceResult, ServiceSchema};
pub use scheduler::Scheduler;
pub use store::{ListenerId, StateStore};
