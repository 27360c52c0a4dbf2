//! Schedule registry: one cancellable recurring timer per operation key.
//!
//! Ticks launch work asynchronously and are dropped, never queued, when the
//! key is still busy. `last_run`/`next_run` reflect wall-clock schedule,
//! independent of how long a launched run takes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::model::OperationKey;

/// Snapshot of one recurring task, as returned by `getSyncSchedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub key: OperationKey,
    pub interval_ms: u64,
    pub interval_minutes: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub overdue: bool,
}

struct TaskState {
    interval: Duration,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
}

struct TaskEntry {
    state: Arc<Mutex<TaskState>>,
    handle: JoinHandle<()>,
}

/// Holds every recurring timer registered by the orchestrator. Dropping or
/// cancelling the registry deterministically stops all outstanding timers.
#[derive(Default)]
pub struct ScheduleRegistry {
    tasks: Mutex<HashMap<OperationKey, TaskEntry>>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recurring timer for `key`. `on_tick` must be non-blocking:
    /// it claims the key and spawns the actual work, returning whether a run
    /// was launched. A tick that does not launch (key busy) leaves `last_run`
    /// untouched.
    ///
    /// Re-registering a key cancels the previous timer.
    pub fn register<F>(&self, key: OperationKey, interval: Duration, on_tick: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let state = Arc::new(Mutex::new(TaskState {
            interval,
            last_run: None,
            next_run: Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default(),
        }));

        let timer_state = Arc::clone(&state);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticks = tokio::time::interval_at(start, interval);
            loop {
                ticks.tick().await;
                let launched = on_tick();
                let now = Utc::now();
                let mut state = timer_state.lock().expect("schedule state poisoned");
                if launched {
                    state.last_run = Some(now);
                } else {
                    debug!("[Schedule] {timer_key}: tick dropped, run not launched");
                }
                state.next_run =
                    now + chrono::Duration::from_std(state.interval).unwrap_or_default();
            }
        });

        let mut tasks = self.tasks.lock().expect("schedule registry poisoned");
        if let Some(previous) = tasks.insert(key, TaskEntry { state, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel every registered timer. No new operations are launched after
    /// this returns; in-flight work is unaffected.
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().expect("schedule registry poisoned");
        for (key, entry) in tasks.drain() {
            debug!("[Schedule] cancelling timer for {key}");
            entry.handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().expect("schedule registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered tasks sorted by soonest `next_run`.
    pub fn snapshot(&self) -> Vec<ScheduleEntry> {
        let now = Utc::now();
        let tasks = self.tasks.lock().expect("schedule registry poisoned");
        let mut entries: Vec<ScheduleEntry> = tasks
            .iter()
            .map(|(key, entry)| {
                let state = entry.state.lock().expect("schedule state poisoned");
                let interval_ms = state.interval.as_millis() as u64;
                ScheduleEntry {
                    key: key.clone(),
                    interval_ms,
                    interval_minutes: interval_ms / 60_000,
                    last_run: state.last_run,
                    next_run: state.next_run,
                    overdue: state.next_run < now,
                }
            })
            .collect();
        entries.sort_by_key(|entry| entry.next_run);
        entries
    }
}

impl Drop for ScheduleRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
