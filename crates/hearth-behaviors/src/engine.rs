//! Shared plumbing for behavior engines.
//!
//! [`EngineCore`] carries what every engine needs: the owned entity set,
//! handles to the store/clock/scheduler, a start-once guard, and the
//! merge-write helper that keeps sibling attributes intact when a service
//! only touches one of them.

use hearth_kernel::clock::SimulationClock;
use hearth_kernel::error::{KernelError, KernelResult};
use hearth_kernel::model::{AttrMap, EntityState, split_entity_id};
use hearth_kernel::scheduler::Scheduler;
use hearth_kernel::store::StateStore;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub(crate) struct EngineCore {
    domain: &'static str,
    pub(crate) store: Arc<StateStore>,
    pub(crate) clock: Arc<SimulationClock>,
    pub(crate) scheduler: Arc<Scheduler>,
    /// Owned ids, ordered so ambient ticks iterate deterministically.
    entities: RwLock<BTreeSet<String>>,
    started: AtomicBool,
}

impl EngineCore {
    pub(crate) fn new(
        domain: &'static str,
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            domain,
            store,
            clock,
            scheduler,
            entities: RwLock::new(BTreeSet::new()),
            started: AtomicBool::new(false),
        }
    }

    pub(crate) fn domain(&self) -> &'static str {
        self.domain
    }

    /// Validate the id against this engine's domain and record ownership.
    pub(crate) fn admit(&self, entity_id: &str) -> KernelResult<()> {
        let (domain, _) = split_entity_id(entity_id)?;
        if domain != self.domain {
            return Err(KernelError::invalid(format!(
                "entity {entity_id} does not belong to domain {}",
                self.domain
            )));
        }
        self.entities.write().insert(entity_id.to_string());
        debug!(entity_id, domain = self.domain, "registered entity");
        Ok(())
    }

    pub(crate) fn owns(&self, entity_id: &str) -> bool {
        self.entities.read().contains(entity_id)
    }

    pub(crate) fn entity_ids(&self) -> Vec<String> {
        self.entities.read().iter().cloned().collect()
    }

    /// First call returns true; later calls false. Makes `start` idempotent.
    pub(crate) fn begin_start(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    /// Hour of day in simulated time, for activity curves.
    pub(crate) fn sim_hour(&self) -> u32 {
        use chrono::Timelike;
        self.clock.now().hour()
    }

    /// Write `state` merging `delta` over the entity's existing attributes,
    /// so touching one attribute does not discard its siblings.
    pub(crate) fn update_state(
        &self,
        entity_id: &str,
        state: &str,
        delta: AttrMap,
    ) -> KernelResult<Arc<EntityState>> {
        let merged = match self.store.get_state(entity_id) {
            Some(current) => {
                let mut attrs = current.attributes.clone();
                attrs.extend(delta);
                attrs
            }
            None => delta,
        };
        self.store.set_state(entity_id, state, merged)
    }
}

/// `Kitchen Counter` from `kitchen_counter`, unless a name was configured.
pub(crate) fn friendly_name(entity_id: &str, configured: Option<&str>) -> String {
    if let Some(name) = configured {
        return name.to_string();
    }
    let object_id = entity_id.split('.').nth(1).unwrap_or(entity_id);
    object_id
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Numeric field from a service payload. Accepts JSON numbers and numeric
/// strings; anything else is an `InvalidArgument`.
pub(crate) fn data_f64(data: &AttrMap, key: &str) -> KernelResult<Option<f64>> {
    match data.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.parse().map(Some).map_err(|_| {
            KernelError::invalid(format!("field {key:?} is not numeric: {s:?}"))
        }),
        Some(other) => Err(KernelError::invalid(format!(
            "field {key:?} must be numeric, got {other}"
        ))),
    }
}

/// String field from a service payload.
pub(crate) fn data_str<'a>(data: &'a AttrMap, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

/// Boolean field from a service payload.
pub(crate) fn data_bool(data: &AttrMap, key: &str) -> KernelResult<Option<bool>> {
    match data.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(KernelError::invalid(format!(
            "field {key:?} must be a boolean, got {other}"
        ))),
    }
}

pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
