//! Service registry: maps `(domain, service)` to the owning engine and
//! advertises the service schema for discovery.
//!
//! `call_service` aggregates per-target outcomes and never raises: an
//! unknown domain, an unknown service, or a failing handler all become
//! `{ok: false}` entries in the result list.

use crate::engine::BehaviorEngine;
use crate::error::{KernelError, KernelResult};
use crate::metrics::KernelMetrics;
use crate::model::AttrMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One declared service field, for discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceField {
    pub description: String,
}

impl ServiceField {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// One advertised service: description plus named fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSchema {
    pub description: String,
    #[serde(default)]
    pub fields: BTreeMap<String, ServiceField>,
}

impl ServiceSchema {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, description: &str) -> Self {
        self.fields
            .insert(name.to_string(), ServiceField::new(description));
        self
    }
}

/// Services advertised for one domain.
pub type DomainServices = BTreeMap<String, ServiceSchema>;

/// Per-target outcome of a service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceResult {
    fn ok(entity_id: Option<&str>) -> Self {
        Self {
            entity_id: entity_id.map(str::to_string),
            ok: true,
            error: None,
        }
    }

    fn fail(entity_id: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.map(str::to_string),
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Registry and dispatcher for domain services.
pub struct ServiceRegistry {
    metrics: Arc<KernelMetrics>,
    engines: RwLock<HashMap<String, Arc<dyn BehaviorEngine>>>,
    services: RwLock<BTreeMap<String, DomainServices>>,
}

impl ServiceRegistry {
    pub fn new(metrics: Arc<KernelMetrics>) -> Self {
        Self {
            metrics,
            engines: RwLock::new(HashMap::new()),
            services: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a behavior engine under its domain and install the default
    /// service schema for that domain. A second registration of the same
    /// domain replaces the first.
    pub fn register_engine(&self, engine: Arc<dyn BehaviorEngine>) {
        let domain = engine.domain().to_string();
        let replaced = self
            .engines
            .write()
            .insert(domain.clone(), engine)
            .is_some();
        if replaced {
            warn!(%domain, "replacing previously registered engine");
        }
        self.services
            .write()
            .entry(domain.clone())
            .or_default()
            .extend(default_schema(&domain));
        info!(%domain, "registered behavior engine");
    }

    /// Engine registered for `domain`, if any.
    pub fn engine_for(&self, domain: &str) -> Option<Arc<dyn BehaviorEngine>> {
        self.engines.read().get(domain).cloned()
    }

    /// Advertise an additional service beyond the domain defaults.
    pub fn register_custom_service(
        &self,
        domain: &str,
        service: &str,
        schema: ServiceSchema,
    ) {
        self.services
            .write()
            .entry(domain.to_string())
            .or_default()
            .insert(service.to_string(), schema);
        info!(%domain, %service, "registered custom service");
    }

    /// Dispatch a service call to the owning engine, once per target id,
    /// or once with no id when `target_ids` is empty (house-wide services
    /// permit this).
    pub fn call_service(
        &self,
        domain: &str,
        service: &str,
        target_ids: &[String],
        data: &AttrMap,
    ) -> Vec<ServiceResult> {
        let Some(engine) = self.engine_for(domain) else {
            self.metrics.record_service_call();
            self.metrics.record_service_failure();
            return vec![ServiceResult::fail(
                None,
                KernelError::UnknownDomain(domain.to_string()).to_string(),
            )];
        };

        let known_service = self
            .services
            .read()
            .get(domain)
            .is_some_and(|d| d.contains_key(service));
        if !known_service {
            let err = KernelError::UnknownService {
                domain: domain.to_string(),
                service: service.to_string(),
            }
            .to_string();
            let targets: Vec<Option<&str>> = if target_ids.is_empty() {
                vec![None]
            } else {
                target_ids.iter().map(|id| Some(id.as_str())).collect()
            };
            return targets
                .into_iter()
                .map(|id| {
                    self.metrics.record_service_call();
                    self.metrics.record_service_failure();
                    ServiceResult::fail(id, err.clone())
                })
                .collect();
        }

        if target_ids.is_empty() {
            return vec![self.invoke(&engine, service, None, data)];
        }
        target_ids
            .iter()
            .map(|id| self.invoke(&engine, service, Some(id.as_str()), data))
            .collect()
    }

    /// Full schema map for discovery endpoints.
    pub fn services_schema(&self) -> BTreeMap<String, DomainServices> {
        self.services.read().clone()
    }

    /// Schema for a single domain.
    pub fn domain_services(&self, domain: &str) -> Option<DomainServices> {
        self.services.read().get(domain).cloned()
    }

    fn invoke(
        &self,
        engine: &Arc<dyn BehaviorEngine>,
        service: &str,
        entity_id: Option<&str>,
        data: &AttrMap,
    ) -> ServiceResult {
        self.metrics.record_service_call();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            engine.handle_service_call(service, entity_id, data)
        }));
        let result = match outcome {
            Ok(Ok(true)) => ServiceResult::ok(entity_id),
            Ok(Ok(false)) => ServiceResult::fail(
                entity_id,
                format!(
                    "{}.{service} not handled for {}",
                    engine.domain(),
                    entity_id.unwrap_or("<none>")
                ),
            ),
            Ok(Err(err)) => ServiceResult::fail(entity_id, err.to_string()),
            Err(_) => {
                error!(
                    domain = engine.domain(),
                    service,
                    entity_id = entity_id.unwrap_or("<none>"),
                    "service handler panicked"
                );
                ServiceResult::fail(entity_id, "service handler panicked")
            }
        };
        if !result.ok {
            self.metrics.record_service_failure();
        }
        result
    }
}

/// Default services advertised when an engine binds its domain.
fn default_schema(domain: &str) -> DomainServices {
    let mut services = DomainServices::new();

    if matches!(
        domain,
        "light" | "switch" | "climate" | "fan" | "cover" | "lock" | "media_player"
    ) {
        let mut turn_on = ServiceSchema::new(format!("Turn on {domain}"));
        if domain == "light" {
            turn_on = turn_on
                .with_field("brightness", "Brightness (0-255)")
                .with_field("color_temp", "Color temperature in mireds")
                .with_field("rgb_color", "RGB color")
                .with_field("effect", "Light effect");
        }
        services.insert("turn_on".into(), turn_on);
        services.insert(
            "turn_off".into(),
            ServiceSchema::new(format!("Turn off {domain}")),
        );
        services.insert(
            "toggle".into(),
            ServiceSchema::new(format!("Toggle {domain}")),
        );
    }

    match domain {
        "climate" => {
            services.insert(
                "set_temperature".into(),
                ServiceSchema::new("Set target temperature")
                    .with_field("temperature", "Target temperature")
                    .with_field("hvac_mode", "HVAC mode"),
            );
            services.insert(
                "set_hvac_mode".into(),
                ServiceSchema::new("Set HVAC mode").with_field("hvac_mode", "HVAC mode"),
            );
            services.insert(
                "set_preset_mode".into(),
                ServiceSchema::new("Set preset mode").with_field("preset_mode", "Preset mode"),
            );
            services.insert(
                "set_fan_mode".into(),
                ServiceSchema::new("Set fan mode").with_field("fan_mode", "Fan mode"),
            );
            services.insert(
                "set_humidity".into(),
                ServiceSchema::new("Set target humidity").with_field("humidity", "Target humidity"),
            );
        }
        "cover" => {
            services.insert("open_cover".into(), ServiceSchema::new("Open cover"));
            services.insert("close_cover".into(), ServiceSchema::new("Close cover"));
            services.insert("stop_cover".into(), ServiceSchema::new("Stop cover"));
            services.insert(
                "set_cover_position".into(),
                ServiceSchema::new("Set cover position").with_field("position", "Position (0-100)"),
            );
        }
        _ => {}
    }

    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEngine {
        calls: AtomicUsize,
    }

    impl FakeEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl BehaviorEngine for FakeEngine {
        fn domain(&self) -> &'static str {
            "light"
        }

        fn register_entity(&self, _entity_id: &str, _config: Option<serde_json::Value>) -> KernelResult<()> {
            Ok(())
        }

        fn start(self: Arc<Self>) {}

        fn handle_service_call(
            &self,
            service: &str,
            entity_id: Option<&str>,
            _data: &AttrMap,
        ) -> KernelResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match service {
                "turn_on" | "turn_off" | "toggle" => Ok(entity_id != Some("light.unowned")),
                "explode" => Err(KernelError::invalid("boom")),
                "panic" => panic!("handler panic"),
                _ => Ok(false),
            }
        }
    }

    fn registry_with_engine() -> (ServiceRegistry, Arc<FakeEngine>) {
        let registry = ServiceRegistry::new(Arc::new(KernelMetrics::new()));
        let engine = FakeEngine::new();
        registry.register_engine(engine.clone());
        (registry, engine)
    }

    #[test]
    fn unknown_domain_yields_single_failure() {
        let registry = ServiceRegistry::new(Arc::new(KernelMetrics::new()));
        let results = registry.call_service("vacuum", "start", &[], &AttrMap::new());
        assert_eq!(results.len(), 1);
        assert!(!results[0].ok);
        assert!(results[0].error.as_ref().unwrap().contains("vacuum"));
    }

    #[test]
    fn unknown_service_fails_per_target() {
        let (registry, _engine) = registry_with_engine();
        let ids = vec!["light.a".to_string(), "light.b".to_string()];
        let results = registry.call_service("light", "warp", &ids, &AttrMap::new());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.ok));
        assert!(results[0].error.as_ref().unwrap().contains("light.warp"));
    }

    #[test]
    fn dispatch_accumulates_per_target_results_in_order() {
        let (registry, engine) = registry_with_engine();
        let ids = vec![
            "light.a".to_string(),
            "light.unowned".to_string(),
            "light.b".to_string(),
        ];
        let results = registry.call_service("light", "turn_on", &ids, &AttrMap::new());

        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].entity_id.as_deref(), Some("light.a"));
        assert!(results[0].ok);
        assert!(!results[1].ok);
        assert!(results[2].ok);
    }

    #[test]
    fn empty_targets_invoke_once_without_id() {
        let (registry, engine) = registry_with_engine();
        let results = registry.call_service("light", "turn_on", &[], &AttrMap::new());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 1);
        assert!(results[0].entity_id.is_none());
    }

    #[test]
    fn handler_errors_and_panics_fail_only_their_target() {
        let (registry, _engine) = registry_with_engine();
        registry.register_custom_service("light", "explode", ServiceSchema::new("Boom"));
        registry.register_custom_service("light", "panic", ServiceSchema::new("Panic"));

        let ids = vec!["light.a".to_string()];
        let explode = registry.call_service("light", "explode", &ids, &AttrMap::new());
        assert!(!explode[0].ok);
        assert!(explode[0].error.as_ref().unwrap().contains("boom"));

        let panicked = registry.call_service("light", "panic", &ids, &AttrMap::new());
        assert!(!panicked[0].ok);

        // The registry survives both.
        let ok = registry.call_service("light", "turn_on", &ids, &AttrMap::new());
        assert!(ok[0].ok);
    }

    #[test]
    fn default_schema_covers_common_services() {
        let (registry, _engine) = registry_with_engine();
        let schema = registry.services_schema();
        let light = schema.get("light").unwrap();
        assert!(light.contains_key("turn_on"));
        assert!(light.contains_key("turn_off"));
        assert!(light.contains_key("toggle"));
        assert!(light["turn_on"].fields.contains_key("brightness"));
        assert!(light["turn_on"].fields.contains_key("rgb_color"));

        assert_eq!(json!(light["toggle"].fields), json!({}));
    }
}
