//! End-to-end scenarios across the kernel and the behavior engines.

use chrono::Duration as ChronoDuration;
use hearth_behaviors::simulator::{Simulator, SimulatorConfig};
use hearth_kernel::clock::SimulationClock;
use hearth_kernel::metrics::KernelMetrics;
use hearth_kernel::model::AttrMap;
use hearth_kernel::scheduler::Scheduler;
use hearth_kernel::store::StateStore;
use hearth_testing::{paused_simulator, payload, record_events};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

// 1. Light on/off through the full service path.
#[tokio::test]
async fn light_on_off_round_trip() {
    let sim = paused_simulator();
    sim.create_entity("light.kitchen", None).unwrap();
    let events = record_events(&sim);

    let results = sim.registry().call_service(
        "light",
        "turn_on",
        &["light.kitchen".to_string()],
        &payload(json!({"brightness": 128})),
    );
    assert_eq!(results.len(), 1);
    assert!(results[0].ok);

    let state = sim.store().get_state("light.kitchen").unwrap();
    assert_eq!(state.state, "on");
    assert_eq!(state.attr_f64("brightness"), Some(128.0));

    {
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_state.as_deref(), Some("off"));
        assert_eq!(events[0].new_state, "on");
    }

    let results = sim.registry().call_service(
        "light",
        "turn_off",
        &["light.kitchen".to_string()],
        &AttrMap::new(),
    );
    assert!(results[0].ok);

    let state = sim.store().get_state("light.kitchen").unwrap();
    assert_eq!(state.state, "off");
    // Brightness survives the off transition.
    assert_eq!(state.attr_f64("brightness"), Some(128.0));
    assert_eq!(events.lock().len(), 2);
}

// 2. Climate convergence: heat from 17°C toward 22°C under acceleration,
// then the engine reports off.
#[tokio::test]
async fn climate_converges_to_target_then_reports_off() {
    let sim = Arc::new(
        Simulator::new(SimulatorConfig {
            // Warm region in summer so thermal drift cooperates with the
            // heater instead of fighting it.
            start_time: Some("2025-07-15T12:00:00Z".parse().unwrap()),
            speed: 3600.0,
            region: "south".into(),
            ..SimulatorConfig::default()
        })
        .unwrap(),
    );
    sim.create_entity("climate.main", Some(json!({"hvac_modes": ["off", "heat"]})))
        .unwrap();

    // Cold room, warm target.
    let attrs = {
        let mut attrs = sim
            .store()
            .get_state("climate.main")
            .unwrap()
            .attributes
            .clone();
        attrs.insert("current_temperature".into(), json!(17.0));
        attrs.insert("temperature".into(), json!(22.0));
        attrs
    };
    sim.store().set_state("climate.main", "heat", attrs).unwrap();

    sim.start();

    // 1 simulated minute is 16.7ms of wall time at 3600x; give the run a
    // couple of simulated hours to converge. Temperature must never fall
    // far below its running peak while the heater is on.
    let mut reached_off = false;
    let mut peak = 17.0f64;
    for _ in 0..600 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = sim.store().get_state("climate.main").unwrap();
        let temp = state.attr_f64("current_temperature").unwrap();
        if state.state == "heat" {
            assert!(temp > peak - 1.0, "temperature collapsed {peak} -> {temp}");
        }
        peak = peak.max(temp);
        if state.state == "off" {
            reached_off = true;
            break;
        }
    }
    sim.stop(Duration::from_secs(5)).await.unwrap();
    assert!(reached_off, "thermostat never reached its target");

    let final_temp = sim
        .store()
        .get_state("climate.main")
        .unwrap()
        .attr_f64("current_temperature")
        .unwrap();
    assert!(final_temp >= 21.0, "stopped heating at {final_temp}");
}

// 3. Scheduler fairness: two repeating tasks at 1s and 7s cadence fire in
// proportion, and callbacks never overlap.
#[tokio::test]
async fn scheduler_cadence_is_proportional_and_serial() {
    let clock = Arc::new(
        SimulationClock::new(Some("2025-06-10T00:00:00Z".parse().unwrap()), 600.0, false)
            .unwrap(),
    );
    let metrics = Arc::new(KernelMetrics::new());
    let scheduler = Scheduler::new(clock.clone(), metrics);

    let in_callback = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let fires_a = Arc::new(AtomicUsize::new(0));
    let fires_b = Arc::new(AtomicUsize::new(0));

    let guard = |count: Arc<AtomicUsize>, busy: Arc<AtomicBool>, clash: Arc<AtomicBool>| {
        move || {
            if busy.swap(true, Ordering::SeqCst) {
                clash.store(true, Ordering::SeqCst);
            }
            count.fetch_add(1, Ordering::SeqCst);
            busy.store(false, Ordering::SeqCst);
        }
    };
    scheduler.schedule_interval(
        ChronoDuration::seconds(1),
        guard(fires_a.clone(), in_callback.clone(), overlapped.clone()),
        Some("fast"),
        false,
    );
    scheduler.schedule_interval(
        ChronoDuration::seconds(7),
        guard(fires_b.clone(), in_callback.clone(), overlapped.clone()),
        Some("slow"),
        false,
    );

    let started_at = clock.now();
    scheduler.start();
    // ~120 simulated seconds at 600x.
    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop(Duration::from_secs(2)).await.unwrap();
    let elapsed_sim = (clock.now() - started_at).num_seconds() as usize;

    let a = fires_a.load(Ordering::SeqCst);
    let b = fires_b.load(Ordering::SeqCst);
    assert!(elapsed_sim >= 60, "only {elapsed_sim}s simulated");
    assert!(
        a.abs_diff(elapsed_sim) <= 3,
        "fast task fired {a} times in {elapsed_sim} simulated seconds"
    );
    assert!(
        b.abs_diff(elapsed_sim / 7) <= 2,
        "slow task fired {b} times in {elapsed_sim} simulated seconds"
    );
    assert!(!overlapped.load(Ordering::SeqCst), "callbacks overlapped");
}

// 4. Pausing the clock freezes notifications; resuming restarts them
// within the scheduler's reaction bound.
#[tokio::test]
async fn pause_freezes_notifications_resume_restarts_them() {
    let clock = Arc::new(
        SimulationClock::new(Some("2025-06-10T00:00:00Z".parse().unwrap()), 10.0, false)
            .unwrap(),
    );
    let metrics = Arc::new(KernelMetrics::new());
    let store = Arc::new(StateStore::new(clock.clone(), metrics.clone()));
    let scheduler = Scheduler::new(clock.clone(), metrics);

    let notified = Arc::new(AtomicUsize::new(0));
    let count = notified.clone();
    store.add_listener(move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    // A 1-simulated-second ambient task bumping a sensor reading.
    let tick_store = store.clone();
    let tick_counter = Arc::new(AtomicUsize::new(0));
    scheduler.schedule_interval(
        ChronoDuration::seconds(1),
        move || {
            let n = tick_counter.fetch_add(1, Ordering::SeqCst);
            let _ = tick_store.set_state("sensor.tick", &n.to_string(), AttrMap::new());
        },
        None,
        false,
    );

    scheduler.start();
    // ~10 simulated seconds.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let before_pause = notified.load(Ordering::SeqCst);
    assert!(before_pause >= 3, "only {before_pause} notifications before pause");

    clock.pause();
    // Let any in-flight callback finish, then sample.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let frozen = notified.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        notified.load(Ordering::SeqCst),
        frozen,
        "notifications arrived while paused"
    );

    clock.resume();
    // The worker re-checks within its 1-second bound.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(
        notified.load(Ordering::SeqCst) > frozen,
        "notifications did not resume"
    );

    scheduler.stop(Duration::from_secs(2)).await.unwrap();
}

// 5. Service fan-out preserves the order of the target list.
#[tokio::test]
async fn service_fan_out_notifies_in_target_order() {
    let sim = paused_simulator();
    sim.create_entity("light.a", None).unwrap();
    sim.create_entity("light.b", None).unwrap();
    let events = record_events(&sim);

    let targets = vec!["light.a".to_string(), "light.b".to_string()];
    let results = sim
        .registry()
        .call_service("light", "turn_on", &targets, &AttrMap::new());

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.ok));
    assert_eq!(results[0].entity_id.as_deref(), Some("light.a"));
    assert_eq!(results[1].entity_id.as_deref(), Some("light.b"));

    let events = events.lock();
    let on_events: Vec<&str> = events
        .iter()
        .filter(|e| e.new_state == "on")
        .map(|e| e.entity_id.as_str())
        .collect();
    assert_eq!(on_events, vec!["light.a", "light.b"]);
    // Sequence numbers are strictly increasing across the batch.
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}

// 6. History is bounded to the configured depth, newest retained.
#[tokio::test]
async fn history_bound_keeps_the_newest_entries() {
    let sim = Simulator::new(SimulatorConfig {
        max_history: 3,
        ..SimulatorConfig::default()
    })
    .unwrap();
    let store = sim.store();

    for i in 0..5 {
        store
            .set_state("sensor.counter", &i.to_string(), AttrMap::new())
            .unwrap();
    }

    let history = store.get_history("sensor.counter", None, None).unwrap();
    assert_eq!(history.len(), 3);
    let states: Vec<&str> = history.iter().map(|s| s.state.as_str()).collect();
    // Priors of the last three changes, insertion order.
    assert_eq!(states, vec!["1", "2", "3"]);

    // The oldest retained entry is no older than anything dropped.
    assert!(history.windows(2).all(|w| w[0].last_updated <= w[1].last_updated));
    let current = store.get_state("sensor.counter").unwrap();
    assert_eq!(current.state, "4");
    assert!(history.last().unwrap().last_updated <= current.last_updated);
}
