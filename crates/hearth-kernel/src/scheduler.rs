//! Simulated-time task scheduler.
//!
//! A single worker task drains a min-heap ordered by simulated `run_at`,
//! translating simulated deadlines into wall sleeps through the clock.
//! Engine callbacks therefore execute serially: there are no intra-engine
//! races by construction. The worker never sleeps longer than one second,
//! so speed changes, pauses, and clock jumps take effect within that
//! bound without tighter polling.

use crate::clock::SimulationClock;
use crate::error::KernelError;
use crate::metrics::KernelMetrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Idle wait when the heap is empty.
const IDLE_WAIT: Duration = Duration::from_millis(100);
/// Upper bound on any single wait, so the loop reacts to clock control.
const MAX_WAIT: Duration = Duration::from_secs(1);

type TaskCallback = Arc<dyn Fn() + Send + Sync>;

struct TaskEntry {
    run_at: DateTime<Utc>,
    /// Insertion sequence; breaks ties between equal deadlines.
    seq: u64,
    task_id: String,
    callback: TaskCallback,
    repeat: Option<ChronoDuration>,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for TaskEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for TaskEntry {}

impl PartialOrd for TaskEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskEntry {
    // Reversed so BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SchedulerInner {
    heap: BinaryHeap<TaskEntry>,
    /// Live task per id: the id's current cancellation flag.
    index: HashMap<String, Arc<AtomicBool>>,
    seq_counter: u64,
    id_counter: u64,
}

impl SchedulerInner {
    /// Drop the index entry when it still belongs to `entry` (the id may
    /// have been re-used by a replacement task in the meantime).
    fn unindex(&mut self, entry: &TaskEntry) {
        if let Some(flag) = self.index.get(&entry.task_id) {
            if Arc::ptr_eq(flag, &entry.cancelled) {
                self.index.remove(&entry.task_id);
            }
        }
    }
}

/// Priority-queue scheduler keyed on simulated time.
pub struct Scheduler {
    clock: Arc<SimulationClock>,
    metrics: Arc<KernelMetrics>,
    inner: Arc<Mutex<SchedulerInner>>,
    running: Arc<AtomicBool>,
    stop: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(clock: Arc<SimulationClock>, metrics: Arc<KernelMetrics>) -> Self {
        Self {
            clock,
            metrics,
            inner: Arc::new(Mutex::new(SchedulerInner {
                heap: BinaryHeap::new(),
                index: HashMap::new(),
                seq_counter: 0,
                id_counter: 0,
            })),
            running: Arc::new(AtomicBool::new(false)),
            stop: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Schedule `callback` to run after a simulated delay.
    ///
    /// With `repeat`, the task reschedules itself at `now + repeat` after
    /// each firing, drift-free against simulated time. Scheduling under an
    /// id that is already live replaces the previous task.
    pub fn schedule_after(
        &self,
        delay: ChronoDuration,
        callback: impl Fn() + Send + Sync + 'static,
        repeat: Option<ChronoDuration>,
        task_id: Option<&str>,
    ) -> String {
        self.push(self.clock.now() + delay, Arc::new(callback), repeat, task_id)
    }

    /// Schedule `callback` at an absolute simulated time.
    pub fn schedule_at(
        &self,
        run_at: DateTime<Utc>,
        callback: impl Fn() + Send + Sync + 'static,
        repeat: Option<ChronoDuration>,
        task_id: Option<&str>,
    ) -> String {
        self.push(run_at, Arc::new(callback), repeat, task_id)
    }

    /// Schedule a repeating task at a fixed simulated interval.
    pub fn schedule_interval(
        &self,
        interval: ChronoDuration,
        callback: impl Fn() + Send + Sync + 'static,
        task_id: Option<&str>,
        run_immediately: bool,
    ) -> String {
        let delay = if run_immediately {
            ChronoDuration::zero()
        } else {
            interval
        };
        self.schedule_after(delay, callback, Some(interval), task_id)
    }

    /// Best-effort cancellation: the task is skipped when it reaches the
    /// front of the queue and never rescheduled. Does not interrupt a
    /// callback that is already running.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.index.remove(task_id) {
            Some(flag) => {
                flag.store(true, AtomicOrdering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Count of scheduled tasks that have not been cancelled.
    pub fn pending_tasks(&self) -> usize {
        self.inner
            .lock()
            .heap
            .iter()
            .filter(|e| !e.cancelled.load(AtomicOrdering::Relaxed))
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::Relaxed)
    }

    /// Start the worker on the current tokio runtime. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, AtomicOrdering::SeqCst) {
            warn!("scheduler already running");
            return;
        }
        let token = CancellationToken::new();
        *self.stop.lock() = Some(token.clone());
        let handle = tokio::spawn(run_worker(
            self.inner.clone(),
            self.clock.clone(),
            self.metrics.clone(),
            self.running.clone(),
            token,
        ));
        *self.worker.lock() = Some(handle);
        info!("scheduler started");
    }

    /// Signal the worker and wait for it to drain, bounded by `timeout`.
    /// Tasks that have not fired are discarded with the worker.
    pub async fn stop(&self, timeout: Duration) -> Result<(), KernelError> {
        let Some(token) = self.stop.lock().take() else {
            return Ok(());
        };
        token.cancel();

        let Some(mut handle) = self.worker.lock().take() else {
            return Ok(());
        };
        let result = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!("scheduler stopped");
                Ok(())
            }
            Ok(Err(join_err)) if join_err.is_panic() => Err(KernelError::Fatal(format!(
                "scheduler worker panicked: {join_err}"
            ))),
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                warn!("scheduler worker did not stop within {timeout:?}; aborting");
                handle.abort();
                self.running.store(false, AtomicOrdering::SeqCst);
                Ok(())
            }
        };

        let mut inner = self.inner.lock();
        inner.heap.clear();
        inner.index.clear();
        result
    }

    fn push(
        &self,
        run_at: DateTime<Utc>,
        callback: TaskCallback,
        repeat: Option<ChronoDuration>,
        task_id: Option<&str>,
    ) -> String {
        let mut inner = self.inner.lock();
        let task_id = match task_id {
            Some(id) => id.to_string(),
            None => {
                inner.id_counter += 1;
                format!("task_{}", inner.id_counter)
            }
        };
        // At most one live task per id: replace any previous holder.
        if let Some(previous) = inner.index.get(&task_id) {
            previous.store(true, AtomicOrdering::Relaxed);
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        inner.index.insert(task_id.clone(), cancelled.clone());
        inner.seq_counter += 1;
        let seq = inner.seq_counter;
        inner.heap.push(TaskEntry {
            run_at,
            seq,
            task_id: task_id.clone(),
            callback,
            repeat,
            cancelled,
        });
        task_id
    }
}

async fn run_worker(
    inner: Arc<Mutex<SchedulerInner>>,
    clock: Arc<SimulationClock>,
    metrics: Arc<KernelMetrics>,
    running: Arc<AtomicBool>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        let now = clock.now();
        // Drain everything due at this simulated instant. Callbacks run
        // outside the heap lock.
        while let Some(mut entry) = pop_due(&inner, now) {
            let callback = entry.callback.clone();
            match catch_unwind(AssertUnwindSafe(|| callback())) {
                Ok(()) => metrics.record_task_fired(),
                Err(_) => {
                    metrics.record_task_failure();
                    error!(task_id = %entry.task_id, "scheduled task panicked");
                }
            }

            let mut guard = inner.lock();
            match entry.repeat {
                // Drift-free against simulated time: step from the scheduled
                // instant while the drain keeps up. After a clock jump or a
                // long pause, fall back to `now` instead of bursting through
                // every missed firing.
                Some(repeat) if !entry.cancelled.load(AtomicOrdering::Relaxed) => {
                    let stepped = entry.run_at + repeat;
                    entry.run_at = if stepped > now { stepped } else { now + repeat };
                    guard.seq_counter += 1;
                    entry.seq = guard.seq_counter;
                    guard.heap.push(entry);
                }
                _ => guard.unindex(&entry),
            }
        }

        let next_deadline = inner.lock().heap.peek().map(|e| e.run_at);
        let wait = match next_deadline {
            None => IDLE_WAIT,
            Some(deadline) => match clock.wall_time_until(deadline) {
                Some(wall) => wall.min(MAX_WAIT),
                // Paused: nothing can become due; re-check within the bound.
                None if clock.is_paused() => MAX_WAIT,
                // Already due (time moved while draining): go again.
                None => continue,
            },
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    running.store(false, AtomicOrdering::SeqCst);
    debug!("scheduler worker exited");
}

fn pop_due(inner: &Mutex<SchedulerInner>, now: DateTime<Utc>) -> Option<TaskEntry> {
    let mut guard = inner.lock();
    loop {
        let due = guard.heap.peek().is_some_and(|e| e.run_at <= now);
        if !due {
            return None;
        }
        let entry = guard.heap.pop().expect("peeked entry");
        if entry.cancelled.load(AtomicOrdering::Relaxed) {
            guard.unindex(&entry);
            continue;
        }
        return Some(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fixture() -> (Arc<SimulationClock>, Scheduler) {
        let clock = Arc::new(
            SimulationClock::new(
                Some("2025-03-01T00:00:00Z".parse().unwrap()),
                // 600x: one simulated second is ~1.7ms of wall time.
                600.0,
                false,
            )
            .unwrap(),
        );
        let scheduler = Scheduler::new(clock.clone(), Arc::new(KernelMetrics::new()));
        (clock, scheduler)
    }

    #[tokio::test]
    async fn one_shot_task_fires_once() {
        let (_clock, scheduler) = fixture();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        scheduler.schedule_after(
            ChronoDuration::seconds(1),
            move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            },
            None,
            None,
        );

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop(Duration::from_secs(2)).await.unwrap();

        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn repeating_task_fires_on_cadence() {
        let (_clock, scheduler) = fixture();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        scheduler.schedule_interval(
            ChronoDuration::seconds(10),
            move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            },
            Some("tick"),
            false,
        );

        scheduler.start();
        // ~600 simulated seconds pass in 1s of wall time: expect ~60 fires.
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.stop(Duration::from_secs(2)).await.unwrap();

        let count = fired.load(AtomicOrdering::SeqCst);
        assert!((40..=80).contains(&count), "fired {count} times");
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let (_clock, scheduler) = fixture();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = scheduler.schedule_after(
            ChronoDuration::seconds(30),
            move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            },
            None,
            Some("doomed"),
        );
        assert_eq!(id, "doomed");
        assert!(scheduler.cancel("doomed"));
        assert!(!scheduler.cancel("doomed"));

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop(Duration::from_secs(2)).await.unwrap();

        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rescheduling_an_id_replaces_the_previous_task() {
        let (_clock, scheduler) = fixture();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        scheduler.schedule_after(
            ChronoDuration::seconds(1),
            move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            },
            None,
            Some("job"),
        );
        let s = second.clone();
        scheduler.schedule_after(
            ChronoDuration::seconds(1),
            move || {
                s.fetch_add(1, AtomicOrdering::SeqCst);
            },
            None,
            Some("job"),
        );

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop(Duration::from_secs(2)).await.unwrap();

        assert_eq!(first.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(second.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_task_does_not_kill_the_worker() {
        let (_clock, scheduler) = fixture();
        scheduler.schedule_after(
            ChronoDuration::seconds(1),
            || panic!("task blew up"),
            None,
            None,
        );
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        scheduler.schedule_after(
            ChronoDuration::seconds(2),
            move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            },
            None,
            None,
        );

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop(Duration::from_secs(2)).await.unwrap();

        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tasks_do_not_fire_while_paused() {
        let (clock, scheduler) = fixture();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        scheduler.schedule_interval(
            ChronoDuration::seconds(5),
            move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            },
            None,
            false,
        );

        clock.pause();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);

        clock.resume();
        // The worker re-checks within its 1s bound.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        scheduler.stop(Duration::from_secs(2)).await.unwrap();
        assert!(fired.load(AtomicOrdering::SeqCst) > 0);
    }
}
