//! Periodic tasks from an explicit registration list
//!
//! Tasks are registered by name and period at startup, then spawned onto
//! the tokio runtime by [`IntervalScheduler::start`]. Each task's first
//! run happens one period after start. Runs of the same task never
//! overlap: a slow run delays the next tick instead of stacking up.

use crate::errors::ScheduleError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

struct IntervalTask {
    name: String,
    period: Duration,
    run: TaskFn,
}

/// Runs registered tasks at fixed periods until shut down or dropped
#[derive(Default)]
pub struct IntervalScheduler {
    tasks: Vec<IntervalTask>,
    handles: Vec<JoinHandle<()>>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to the registration list
    ///
    /// Must happen before [`start`](Self::start).
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        task: F,
    ) -> Result<(), ScheduleError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if self.is_running() {
            return Err(ScheduleError::RegisteredAfterStart { task: name, period });
        }
        if period.is_zero() {
            return Err(ScheduleError::ZeroPeriod { task: name });
        }
        if self.tasks.iter().any(|t| t.name == name) {
            return Err(ScheduleError::Duplicate { task: name });
        }

        self.tasks.push(IntervalTask {
            name,
            period,
            run: Arc::new(move || Box::pin(task()) as TaskFuture),
        });
        Ok(())
    }

    /// Spawn every registered task; needs a running tokio runtime
    pub fn start(&mut self) -> Result<(), ScheduleError> {
        if self.is_running() {
            return Err(ScheduleError::AlreadyStarted);
        }

        for task in &self.tasks {
            let name = task.name.clone();
            let period = task.period;
            let run = Arc::clone(&task.run);

            self.handles.push(tokio::spawn(async move {
                let mut ticker = time::interval_at(time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    tracing::trace!(task = %name, "running periodic task");
                    run().await;
                }
            }));
        }

        tracing::info!(tasks = self.tasks.len(), "interval scheduler started");
        Ok(())
    }

    /// Stop all running tasks; the registration list is kept
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        tracing::info!("interval scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for IntervalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalScheduler")
            .field("tasks", &self.task_names())
            .field("running", &self.is_running())
            .finish()
    }
}
