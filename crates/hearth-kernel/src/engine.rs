//! The seam between the kernel and the domain crates.
//!
//! The kernel defines the object-safe [`BehaviorEngine`] contract; the
//! behaviors crate implements it once per domain. The service registry
//! only ever sees `Arc<dyn BehaviorEngine>`.

use crate::error::KernelResult;
use crate::model::AttrMap;
use serde_json::Value;
use std::sync::Arc;

/// A domain-specific behavior engine.
///
/// An engine owns the entities of exactly one domain: it initializes
/// them, schedules their ambient simulation, and handles service calls
/// dispatched by the registry. Engines do not own threads; all of their
/// callbacks run serially on the scheduler worker.
pub trait BehaviorEngine: Send + Sync {
    /// Lowercase domain token (`light`, `sensor`, …).
    fn domain(&self) -> &'static str;

    /// Register an entity with this engine and write its initial state if
    /// the store does not have one yet.
    ///
    /// Ids whose domain prefix does not match the engine are refused with
    /// `InvalidArgument`.
    fn register_entity(&self, entity_id: &str, config: Option<Value>) -> KernelResult<()>;

    /// Schedule the engine's recurring ambient tasks. Idempotent.
    fn start(self: Arc<Self>);

    /// Tear-down hook; the default does nothing.
    fn stop(&self) {}

    /// Handle one service invocation for one target.
    ///
    /// Returns `Ok(true)` when handled, `Ok(false)` when the entity is not
    /// owned by this engine or the service name is unknown to it, and
    /// `Err(InvalidArgument)` for payload violations. `entity_id` is
    /// `None` for services that permit target-less invocation.
    fn handle_service_call(
        &self,
        service: &str,
        entity_id: Option<&str>,
        data: &AttrMap,
    ) -> KernelResult<bool>;
}
