//! Background task queue
//!
//! Flow runs are keyed by a flow-run id. At most one execution per id runs at
//! any moment: a resubmission while the earlier task is still queued replaces
//! it, and a resubmission while it is running waits until that run finishes.

use crate::error::UnitError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handle returned for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub task_id: String,
}

/// Accepts named flow runs for asynchronous execution.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn submit(
        &self,
        flow_name: &str,
        flow_run_id: Uuid,
        inputs: Map<String, Value>,
    ) -> Result<TaskSubmission, UnitError>;
}

/// Executes one kind of flow.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    async fn run(&self, flow_run_id: Uuid, inputs: Map<String, Value>) -> Result<(), UnitError>;

    /// Called after a run exceeded the queue's job timeout and was dropped.
    async fn on_timeout(&self, _flow_run_id: Uuid) {}
}

/// Configuration for the local queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Per-run limit in seconds; `None` disables the limit
    pub job_timeout_secs: Option<u64>,
    /// Idle worker wake-up interval (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            job_timeout_secs: Some(1800),
            poll_interval_ms: 100,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Runs waiting for a worker
    pub pending: usize,
    /// Runs currently executing
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Queued tasks replaced by a newer submission for the same flow run
    pub superseded: usize,
    pub timed_out: usize,
}

/// A submission bound to the handler resolved when it was accepted.
struct QueuedTask {
    task_id: String,
    flow_name: String,
    handler: Arc<dyn FlowHandler>,
    inputs: Map<String, Value>,
}

#[derive(Default)]
struct FlowRunEntry {
    queued: Option<QueuedTask>,
    running: Option<String>,
}

#[derive(Default)]
struct QueueState {
    /// Flow runs with a queued task and nothing running
    ready: VecDeque<Uuid>,
    entries: HashMap<Uuid, FlowRunEntry>,
}

type HandlerMap = HashMap<String, Arc<dyn FlowHandler>>;

/// In-process queue backed by tokio worker tasks.
pub struct LocalTaskQueue {
    state: Arc<Mutex<QueueState>>,
    handlers: Arc<RwLock<HandlerMap>>,
    notify: Arc<Notify>,
    workers: RwLock<Vec<tokio::task::JoinHandle<()>>>,
    running: Arc<RwLock<bool>>,
    stats: Arc<RwLock<QueueStats>>,
    config: QueueConfig,
}

impl LocalTaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            workers: RwLock::new(Vec::new()),
            running: Arc::new(RwLock::new(false)),
            stats: Arc::new(RwLock::new(QueueStats::default())),
            config,
        }
    }

    pub fn register(&self, flow_name: impl Into<String>, handler: Arc<dyn FlowHandler>) {
        self.handlers.write().insert(flow_name.into(), handler);
    }

    /// Start background workers
    pub fn start(&self) {
        let mut running = self.running.write();
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let mut workers = self.workers.write();
        for worker_id in 0..self.config.workers.max(1) {
            let state = Arc::clone(&self.state);
            let notify = Arc::clone(&self.notify);
            let running = Arc::clone(&self.running);
            let stats = Arc::clone(&self.stats);
            let config = self.config.clone();
            workers.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, state, notify, running, stats, config).await;
            }));
        }

        info!(worker_count = workers.len(), "Started task queue workers");
    }

    /// Stop background workers; in-flight runs finish first.
    pub async fn stop(&self) {
        let mut running = self.running.write();
        if !*running {
            return;
        }
        *running = false;
        drop(running);
        self.notify.notify_waiters();

        let workers = std::mem::take(&mut *self.workers.write());
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Task queue worker panicked");
            }
        }
        info!("Stopped task queue workers");
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.read().clone()
    }

    /// Wait until no run is queued or executing.
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> Result<(), UnitError> {
        let start = Instant::now();
        loop {
            if self.state.lock().entries.is_empty() {
                return Ok(());
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(UnitError::TaskQueue(
                        "Timeout waiting for queue to drain".to_string(),
                    ));
                }
            }
            sleep(Duration::from_millis(self.config.poll_interval_ms.max(1))).await;
        }
    }

    async fn worker_loop(
        worker_id: usize,
        state: Arc<Mutex<QueueState>>,
        notify: Arc<Notify>,
        running: Arc<RwLock<bool>>,
        stats: Arc<RwLock<QueueStats>>,
        config: QueueConfig,
    ) {
        debug!(worker_id, "Worker started");

        while *running.read() {
            let next = {
                let mut state = state.lock();
                state.ready.pop_front().and_then(|flow_run_id| {
                    let entry = state.entries.get_mut(&flow_run_id)?;
                    let task = entry.queued.take()?;
                    entry.running = Some(task.task_id.clone());
                    Some((flow_run_id, task))
                })
            };

            let Some((flow_run_id, task)) = next else {
                tokio::select! {
                    _ = notify.notified() => continue,
                    _ = sleep(Duration::from_millis(config.poll_interval_ms.max(1))) => continue,
                }
            };

            {
                let mut stats = stats.write();
                stats.pending = stats.pending.saturating_sub(1);
                stats.running += 1;
            }

            let outcome = Self::execute(worker_id, flow_run_id, &task, &config).await;

            {
                let mut stats = stats.write();
                stats.running = stats.running.saturating_sub(1);
                match &outcome {
                    RunOutcome::Completed => stats.completed += 1,
                    RunOutcome::Failed(_) => stats.failed += 1,
                    RunOutcome::TimedOut => stats.timed_out += 1,
                }
            }
            if let RunOutcome::Failed(message) = &outcome {
                error!(
                    worker_id,
                    flow_run_id = %flow_run_id,
                    task_id = %task.task_id,
                    error = %message,
                    "Flow run failed"
                );
            }

            let requeued = {
                let mut state = state.lock();
                let requeue = match state.entries.get_mut(&flow_run_id) {
                    Some(entry) => {
                        entry.running = None;
                        entry.queued.is_some()
                    }
                    None => false,
                };
                if requeue {
                    state.ready.push_back(flow_run_id);
                } else {
                    state.entries.remove(&flow_run_id);
                }
                requeue
            };
            if requeued {
                notify.notify_one();
            }
        }

        debug!(worker_id, "Worker stopped");
    }

    async fn execute(
        worker_id: usize,
        flow_run_id: Uuid,
        task: &QueuedTask,
        config: &QueueConfig,
    ) -> RunOutcome {
        let handler = &task.handler;
        debug!(
            worker_id,
            flow_run_id = %flow_run_id,
            task_id = %task.task_id,
            flow = %task.flow_name,
            "Flow run started"
        );
        let started = Instant::now();
        let run = handler.run(flow_run_id, task.inputs.clone());
        let result = match config.job_timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        worker_id,
                        flow_run_id = %flow_run_id,
                        task_id = %task.task_id,
                        timeout_secs = secs,
                        "Flow run timed out"
                    );
                    handler.on_timeout(flow_run_id).await;
                    return RunOutcome::TimedOut;
                }
            },
            None => run.await,
        };

        match result {
            Ok(()) => {
                info!(
                    worker_id,
                    flow_run_id = %flow_run_id,
                    task_id = %task.task_id,
                    duration_ms = started.elapsed().as_millis(),
                    "Flow run completed"
                );
                RunOutcome::Completed
            }
            Err(err) => RunOutcome::Failed(err.to_string()),
        }
    }
}

enum RunOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn submit(
        &self,
        flow_name: &str,
        flow_run_id: Uuid,
        inputs: Map<String, Value>,
    ) -> Result<TaskSubmission, UnitError> {
        let handler = self.handlers.read().get(flow_name).cloned().ok_or_else(|| {
            UnitError::TaskQueue(format!("no handler registered for flow '{}'", flow_name))
        })?;

        let task_id = Uuid::new_v4().to_string();
        let task = QueuedTask {
            task_id: task_id.clone(),
            flow_name: flow_name.to_string(),
            handler,
            inputs,
        };

        let superseded = {
            let mut state = self.state.lock();
            let entry = state.entries.entry(flow_run_id).or_default();
            let previous = entry.queued.replace(task);
            let is_running = entry.running.is_some();
            if previous.is_none() && !is_running {
                state.ready.push_back(flow_run_id);
            }
            previous.map(|p| p.task_id)
        };

        {
            let mut stats = self.stats.write();
            match &superseded {
                Some(_) => stats.superseded += 1,
                None => stats.pending += 1,
            }
        }
        if let Some(previous) = superseded {
            debug!(
                flow_run_id = %flow_run_id,
                previous_task_id = %previous,
                task_id = %task_id,
                "Queued task superseded"
            );
        }

        info!(flow = %flow_name, flow_run_id = %flow_run_id, task_id = %task_id, "Task submitted");
        self.notify.notify_one();
        Ok(TaskSubmission { task_id })
    }
}
