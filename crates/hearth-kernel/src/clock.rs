//! Virtual clock with wall-time acceleration.
//!
//! Maps wall time onto simulated time at an adjustable rate and supports
//! jump, pause, and resume. This is the single suspension-to-time contract:
//! every component that needs to wait for a simulated deadline translates
//! it to a wall-time sleep through [`SimulationClock::wall_time_until`],
//! and nothing else in the kernel reads wall time directly.

use crate::error::{KernelError, KernelResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct ClockState {
    /// Simulated time at which the current wall epoch was anchored.
    anchor_sim: DateTime<Utc>,
    /// Wall reading at the same moment.
    anchor_wall: Instant,
    /// Simulated seconds per wall second. Always finite and positive.
    speed: f64,
    /// When paused, `now()` returns this value verbatim.
    paused_at: Option<DateTime<Utc>>,
}

impl ClockState {
    fn now(&self) -> DateTime<Utc> {
        if let Some(frozen) = self.paused_at {
            return frozen;
        }
        let wall_elapsed = self.anchor_wall.elapsed().as_secs_f64();
        self.anchor_sim + duration_from_secs(wall_elapsed * self.speed)
    }
}

/// Virtual clock for the simulation.
///
/// All operations are sub-microsecond arithmetic behind one mutex, so
/// readers and writers share the same lock. Never called while holding
/// another kernel lock.
pub struct SimulationClock {
    state: Mutex<ClockState>,
}

impl SimulationClock {
    /// Clock anchored at `start_time` running at `speed` simulated seconds
    /// per wall second, optionally starting paused.
    pub fn new(
        start_time: Option<DateTime<Utc>>,
        speed: f64,
        paused: bool,
    ) -> KernelResult<Self> {
        validate_speed(speed)?;
        let start = start_time.unwrap_or_else(Utc::now);
        Ok(Self {
            state: Mutex::new(ClockState {
                anchor_sim: start,
                anchor_wall: Instant::now(),
                speed,
                paused_at: paused.then_some(start),
            }),
        })
    }

    /// Real-time clock starting at the current UTC instant.
    pub fn realtime() -> Self {
        // speed 1.0 always validates
        Self::new(None, 1.0, false).expect("1.0 is a valid speed")
    }

    /// Current simulated time. Monotone non-decreasing at fixed speed while
    /// running; piecewise-constant across pause intervals.
    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().now()
    }

    /// Jump to a specific simulated time.
    pub fn set_time(&self, new_time: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.anchor_sim = new_time;
        state.anchor_wall = Instant::now();
        if state.paused_at.is_some() {
            state.paused_at = Some(new_time);
        }
    }

    /// Change the acceleration factor, re-anchoring so `now()` is
    /// continuous across the change.
    pub fn set_speed(&self, speed: f64) -> KernelResult<()> {
        validate_speed(speed)?;
        let mut state = self.state.lock();
        state.anchor_sim = state.now();
        state.anchor_wall = Instant::now();
        state.speed = speed;
        Ok(())
    }

    /// Current acceleration factor.
    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    /// Freeze `now()` at its current value. Idempotent.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused_at.is_none() {
            state.paused_at = Some(state.now());
        }
    }

    /// Resume from a pause, re-anchoring wall time at the frozen simulated
    /// value. No-op when running.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(frozen) = state.paused_at.take() {
            state.anchor_sim = frozen;
            state.anchor_wall = Instant::now();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused_at.is_some()
    }

    /// Jump forward by a simulated duration.
    pub fn advance(&self, delta: ChronoDuration) {
        let mut state = self.state.lock();
        let target = state.now() + delta;
        state.anchor_sim = target;
        state.anchor_wall = Instant::now();
        if state.paused_at.is_some() {
            state.paused_at = Some(target);
        }
    }

    /// Wall-clock duration until `target` simulated time is reached.
    ///
    /// Returns `None` when the target is not in the simulated future or
    /// the clock is paused (a paused clock never reaches any deadline).
    pub fn wall_time_until(&self, target: DateTime<Utc>) -> Option<Duration> {
        let state = self.state.lock();
        if state.paused_at.is_some() {
            return None;
        }
        let sim_remaining = (target - state.now()).num_nanoseconds()? as f64 / 1e9;
        if sim_remaining <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(sim_remaining / state.speed))
    }
}

impl std::fmt::Debug for SimulationClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulationClock")
            .field("now", &state.now())
            .field("speed", &state.speed)
            .field("paused", &state.paused_at.is_some())
            .finish()
    }
}

fn validate_speed(speed: f64) -> KernelResult<()> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(KernelError::invalid(format!(
            "clock speed must be a finite positive number, got {speed}"
        )));
    }
    Ok(())
}

fn duration_from_secs(secs: f64) -> ChronoDuration {
    ChronoDuration::nanoseconds((secs * 1e9) as i64)
}
