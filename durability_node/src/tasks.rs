// Background task scheduler for the durability node
//
// Every periodic loop (node probes, gateway probes, availability scans,
// replication drains, deal workers, the temp janitor) is registered here as a
// recurring task. Each task owns a re-entrancy guard: a tick that arrives
// while the previous run of the same task is still in progress is skipped and
// counted, so slow cycles never pile up. Errors are logged and counted and
// never stop the loop.

use crate::error::{DurabilityError, Result};
use crate::types::now_millis;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Future produced by one run of a recurring task
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Factory that produces a fresh future for every run
pub type TaskFactory = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Run statistics for one recurring task
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    /// Task name
    pub name: String,
    /// Interval between ticks in milliseconds
    pub interval_ms: u64,
    /// Completed runs (successful or not)
    pub runs: u64,
    /// Runs that returned an error
    pub failures: u64,
    /// Ticks skipped because the previous run was still in progress
    pub skipped: u64,
    /// Start of the most recent run, unix millis
    pub last_run_at: Option<u64>,
    /// Duration of the most recent run in milliseconds
    pub last_duration_ms: Option<u64>,
    /// Error of the most recent failed run
    pub last_error: Option<String>,
    /// Whether a run is in progress right now
    pub running: bool,
}

/// Recurring task definition
struct RecurringTask {
    /// Task name
    name: String,

    /// Interval between ticks
    interval: Duration,

    /// Run on the first tick instead of waiting one interval
    run_immediately: bool,

    /// Task factory function
    factory: TaskFactory,

    /// Re-entrancy guard
    in_progress: Arc<AtomicBool>,

    /// Run statistics
    stats: Arc<Mutex<TaskStats>>,
}

/// Clears the re-entrancy guard even if the run panics
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RecurringTask {
    /// Start one run unless the previous one is still active. Returns the
    /// spawned run, or `None` when the tick was skipped.
    fn trigger(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.stats.lock().skipped += 1;
            debug!("Skipping tick for task {}: previous run still in progress", self.name);
            return None;
        }

        let task = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _guard = RunGuard(task.in_progress.clone());
            let started = Instant::now();
            {
                let mut stats = task.stats.lock();
                stats.last_run_at = Some(now_millis());
                stats.running = true;
            }

            let outcome = (task.factory)().await;
            let elapsed = started.elapsed().as_millis() as u64;

            let mut stats = task.stats.lock();
            stats.runs += 1;
            stats.running = false;
            stats.last_duration_ms = Some(elapsed);
            match outcome {
                Ok(()) => debug!("Task {} completed in {}ms", task.name, elapsed),
                Err(e) => {
                    stats.failures += 1;
                    stats.last_error = Some(e.to_string());
                    error!("Task {} failed after {}ms: {}", task.name, elapsed, e);
                }
            }
        }))
    }
}

/// Scheduler for the node's periodic background loops
pub struct TaskScheduler {
    /// Registered recurring tasks
    tasks: Mutex<Vec<Arc<RecurringTask>>>,

    /// Tick loops spawned by `start`
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// Is the scheduler running
    running_flag: Arc<RwLock<bool>>,
}

impl TaskScheduler {
    /// Create a new task scheduler
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            running_flag: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a recurring task
    ///
    /// # Arguments
    ///
    /// * `name` - Unique task name, used in logs and statistics
    /// * `interval` - Time between ticks, measured start to start
    /// * `run_immediately` - Run on start instead of after the first interval
    /// * `factory` - Produces the future for each run
    pub fn register_recurring<F, Fut>(
        &self,
        name: &str,
        interval: Duration,
        run_immediately: bool,
        factory: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let factory: TaskFactory = Arc::new(move || Box::pin(factory()) as TaskFuture);
        let task = Arc::new(RecurringTask {
            name: name.to_string(),
            interval,
            run_immediately,
            factory,
            in_progress: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(TaskStats {
                name: name.to_string(),
                interval_ms: interval.as_millis() as u64,
                ..TaskStats::default()
            })),
        });

        debug!("Registered recurring task {} every {:?}", name, interval);
        self.tasks.lock().push(task);
    }

    /// Start a tick loop for every registered task
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running_flag.write().await;
            if *running {
                return Err(DurabilityError::Internal(
                    "Scheduler is already running".to_string(),
                ));
            }
            *running = true;
        }

        let tasks: Vec<Arc<RecurringTask>> = self.tasks.lock().clone();
        let mut handles = self.handles.lock();
        for task in tasks {
            let running_flag = self.running_flag.clone();
            handles.push(tokio::spawn(async move {
                info!("Starting recurring task {} every {:?}", task.name, task.interval);

                let mut ticker = time::interval(task.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                if !task.run_immediately {
                    // The first tick of a tokio interval completes immediately
                    ticker.tick().await;
                }

                loop {
                    ticker.tick().await;
                    if !*running_flag.read().await {
                        break;
                    }
                    task.trigger();
                }
            }));
        }

        info!("Task scheduler started with {} tasks", handles.len());
        Ok(())
    }

    /// Stop all tick loops. Runs already in flight finish on their own.
    pub async fn stop(&self) {
        *self.running_flag.write().await = false;
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        info!("Task scheduler stopped");
    }

    /// Run a task once now, honoring its re-entrancy guard. Returns `false`
    /// if the run was skipped because one is already in progress.
    pub async fn run_now(&self, name: &str) -> Result<bool> {
        let task = self
            .tasks
            .lock()
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| DurabilityError::NotFound(format!("Unknown task: {}", name)))?;

        match task.trigger() {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!("Task {} run aborted: {}", name, e);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Statistics for every registered task
    pub fn stats(&self) -> Vec<TaskStats> {
        self.tasks
            .lock()
            .iter()
            .map(|t| t.stats.lock().clone())
            .collect()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}
