//! Authoritative entity state store.
//!
//! One exclusive lock covers the current map, the per-entity history, and
//! the listener list; listeners are invoked while the lock is held, which
//! is what makes "every listener sees writes in the same total order"
//! trivially true. Listeners must therefore be non-blocking and must not
//! call back into the store; the gateway's listener only forwards the
//! event into a broadcast channel.

use crate::clock::SimulationClock;
use crate::error::{KernelError, KernelResult};
use crate::metrics::KernelMetrics;
use crate::model::{AttrMap, EntityState, StateChangedEvent, StateContext, split_entity_id};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default bound on retained history entries per entity.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Token returned by [`StateStore::add_listener`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&StateChangedEvent) + Send + Sync>;

struct StoreInner {
    states: HashMap<String, Arc<EntityState>>,
    history: HashMap<String, VecDeque<Arc<EntityState>>>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
    next_seq: u64,
}

/// Thread-safe store of all entity states in the simulation.
pub struct StateStore {
    clock: Arc<SimulationClock>,
    metrics: Arc<KernelMetrics>,
    max_history: usize,
    inner: Mutex<StoreInner>,
}

impl StateStore {
    pub fn new(clock: Arc<SimulationClock>, metrics: Arc<KernelMetrics>) -> Self {
        Self::with_max_history(clock, metrics, DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(
        clock: Arc<SimulationClock>,
        metrics: Arc<KernelMetrics>,
        max_history: usize,
    ) -> Self {
        Self {
            clock,
            metrics,
            max_history,
            inner: Mutex::new(StoreInner {
                states: HashMap::new(),
                history: HashMap::new(),
                listeners: Vec::new(),
                next_listener_id: 0,
                next_seq: 0,
            }),
        }
    }

    /// Write an entity state, notifying listeners when it changed.
    ///
    /// A write that changes neither `state` nor `attributes` leaves the
    /// stored record untouched and notifies nobody.
    pub fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: AttrMap,
    ) -> KernelResult<Arc<EntityState>> {
        self.set_state_with(entity_id, state, attributes, None, false)
    }

    /// [`set_state`](Self::set_state) with origin context and the
    /// `force_update` escape hatch (notify even when nothing changed;
    /// history is still untouched in that case).
    pub fn set_state_with(
        &self,
        entity_id: &str,
        state: &str,
        attributes: AttrMap,
        context: Option<StateContext>,
        force_update: bool,
    ) -> KernelResult<Arc<EntityState>> {
        split_entity_id(entity_id)?;
        // Clock lock ordering: read simulated time before taking the store
        // lock, never while holding it.
        let now = self.clock.now();

        let mut inner = self.inner.lock();

        let old = inner.states.get(entity_id).cloned();
        let changed = match &old {
            None => true,
            Some(prior) => prior.state != state || prior.attributes != attributes,
        };

        if !changed && !force_update {
            self.metrics.record_dedup();
            // Unwrap is safe: !changed implies a prior record exists.
            return Ok(old.expect("unchanged write implies existing state"));
        }

        let new_state = Arc::new(EntityState {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes,
            last_changed: if changed {
                now
            } else {
                old.as_ref().map(|o| o.last_changed).unwrap_or(now)
            },
            last_updated: now,
            context,
        });

        if changed {
            if let Some(prior) = &old {
                let history = inner.history.entry(entity_id.to_string()).or_default();
                history.push_back(prior.clone());
                while history.len() > self.max_history {
                    history.pop_front();
                }
            }
            self.metrics.record_write();
        }

        inner
            .states
            .insert(entity_id.to_string(), new_state.clone());

        inner.next_seq += 1;
        let event = StateChangedEvent {
            seq: inner.next_seq,
            entity_id: entity_id.to_string(),
            old_state: old,
            new_state: new_state.clone(),
            time_fired: now,
        };
        Self::notify(&inner.listeners, &event, &self.metrics);

        Ok(new_state)
    }

    /// Current state of an entity, if present.
    pub fn get_state(&self, entity_id: &str) -> Option<Arc<EntityState>> {
        self.inner.lock().states.get(entity_id).cloned()
    }

    /// Snapshot of every current state.
    pub fn get_all_states(&self) -> Vec<Arc<EntityState>> {
        self.inner.lock().states.values().cloned().collect()
    }

    /// Snapshot of current states whose id belongs to `domain`.
    pub fn get_states_by_domain(&self, domain: &str) -> Vec<Arc<EntityState>> {
        self.inner
            .lock()
            .states
            .values()
            .filter(|s| s.domain() == domain)
            .cloned()
            .collect()
    }

    /// Historical states for an entity, filtered by
    /// `last_updated ∈ [start, end]` when bounds are given.
    ///
    /// Unknown entities are a [`KernelError::NotFound`]; a known entity
    /// that has never changed yields an empty list.
    pub fn get_history(
        &self,
        entity_id: &str,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> KernelResult<Vec<Arc<EntityState>>> {
        let inner = self.inner.lock();
        if !inner.states.contains_key(entity_id) && !inner.history.contains_key(entity_id) {
            return Err(KernelError::NotFound(entity_id.to_string()));
        }
        let entries = inner.history.get(entity_id);
        Ok(entries
            .map(|h| {
                h.iter()
                    .filter(|s| start.is_none_or(|t| s.last_updated >= t))
                    .filter(|s| end.is_none_or(|t| s.last_updated <= t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Remove an entity's current state and history. Returns whether the
    /// entity existed.
    pub fn remove_state(&self, entity_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let existed = inner.states.remove(entity_id).is_some();
        if existed {
            inner.history.remove(entity_id);
        }
        existed
    }

    /// Register a change listener. Listeners are called synchronously,
    /// in registration order, for every committed (or forced) write.
    pub fn add_listener(
        &self,
        listener: impl Fn(&StateChangedEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut inner = self.inner.lock();
        inner.next_listener_id += 1;
        let id = ListenerId(inner.next_listener_id);
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _)| *lid != id);
        inner.listeners.len() != before
    }

    /// Drop every state, history entry, and nothing else (listeners stay).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.states.clear();
        inner.history.clear();
    }

    pub fn entity_count(&self) -> usize {
        self.inner.lock().states.len()
    }

    /// Sorted list of distinct domains with at least one entity.
    pub fn domains(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut domains: Vec<String> = inner
            .states
            .values()
            .map(|s| s.domain().to_string())
            .collect();
        domains.sort();
        domains.dedup();
        domains
    }

    fn notify(
        listeners: &[(ListenerId, Listener)],
        event: &StateChangedEvent,
        metrics: &KernelMetrics,
    ) {
        for (id, listener) in listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(event)));
            match result {
                Ok(()) => metrics.record_notification(),
                Err(panic) => {
                    metrics.record_listener_failure();
                    warn!(
                        listener = id.0,
                        entity_id = %event.entity_id,
                        panic = panic_message(&panic),
                        "state listener panicked; skipping"
                    );
                }
            }
        }
        debug!(
            entity_id = %event.entity_id,
            seq = event.seq,
            state = %event.new_state.state,
            "state committed"
        );
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
