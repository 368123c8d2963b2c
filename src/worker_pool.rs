//! Fixed-size worker pool.
//!
//! Tasks enter through a bounded MPMC intake channel and are drained by
//! `worker_count` loops. Each loop moves its task through
//! Pending -> Processing -> Completed | Failed via the repository, runs it
//! through the executor under a per-task deadline, and forwards a
//! [`TaskResult`] to a bounded result channel. A single publish loop drains
//! that channel into the [`MessagePublisher`].
//!
//! ```ignore
//! let pool = WorkerPool::new(WorkerConfig::new(repo, executor, publisher))?;
//! let cancel = CancellationToken::new();
//! pool.start(&cancel)?;
//! pool.submit_task(&cancel, task)?;
//! pool.shutdown(&cancel).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collaborators::{MessagePublisher, TaskExecutor, TaskRepository};
use crate::encoding::{encode_result, RESULT_TOPIC};
use crate::error::{Result, WorkerError};
use crate::models::{Task, TaskOutput, TaskResult, TaskStatus};
use crate::registry::{WorkerInfoSnapshot, WorkerRegistry};
use crate::stats::{StatsSnapshot, WorkerStats};
use crate::worker_config::WorkerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
  /// Built, not started yet.
  Idle,
  Running,
  /// Intake closed, waiting for loops to drain.
  ShuttingDown,
  /// Drained, or the shutdown timeout elapsed.
  Stopped,
}

pub struct WorkerPool {
  shared: Arc<Shared>,
  state: Mutex<PoolState>,
  worker_count: usize,
  buffer_size: usize,
  shutdown_timeout: Duration,
  task_tx: async_channel::Sender<Task>,
  task_rx: async_channel::Receiver<Task>,
  result_tx: Mutex<Option<mpsc::Sender<TaskResult>>>,
  result_rx: Mutex<Option<mpsc::Receiver<TaskResult>>>,
  loops: Mutex<Option<LoopHandles>>,
}

struct LoopHandles {
  workers: Vec<JoinHandle<()>>,
  publisher: JoinHandle<()>,
}

/// State the spawned loops share with the pool.
struct Shared {
  name: String,
  repository: Arc<dyn TaskRepository>,
  executor: Arc<dyn TaskExecutor>,
  publisher: Arc<dyn MessagePublisher>,
  stats: Arc<WorkerStats>,
  registry: WorkerRegistry,
  process_timeout: Duration,
}

impl WorkerPool {
  /// Validates `config` and builds an idle pool. Nothing is spawned until
  /// [`start`](Self::start).
  pub fn new(config: WorkerConfig) -> Result<Self> {
    let config = config.resolve()?;
    let (task_tx, task_rx) = async_channel::bounded(config.buffer_size);
    let (result_tx, result_rx) = mpsc::channel(config.buffer_size);

    Ok(Self {
      shared: Arc::new(Shared {
        name: config.name,
        repository: config.repository,
        executor: config.executor,
        publisher: config.publisher,
        stats: config.stats,
        registry: WorkerRegistry::new(),
        process_timeout: config.process_timeout,
      }),
      state: Mutex::new(PoolState::Idle),
      worker_count: config.worker_count,
      buffer_size: config.buffer_size,
      shutdown_timeout: config.shutdown_timeout,
      task_tx,
      task_rx,
      result_tx: Mutex::new(Some(result_tx)),
      result_rx: Mutex::new(Some(result_rx)),
      loops: Mutex::new(None),
    })
  }

  /// Spawns the worker loops and the publish loop, all bound to `cancel`.
  /// Must be called inside a Tokio runtime. Returns without waiting for the
  /// loops to run.
  pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
    let (result_tx, result_rx) = {
      let mut state = self.state.lock();
      match *state {
        PoolState::Running => return Err(WorkerError::AlreadyRunning),
        PoolState::ShuttingDown | PoolState::Stopped => return Err(WorkerError::AlreadyStopped),
        PoolState::Idle => {}
      }
      let result_tx = self.result_tx.lock().clone().ok_or(WorkerError::AlreadyStopped)?;
      let result_rx = self.result_rx.lock().take().ok_or(WorkerError::AlreadyStopped)?;
      *state = PoolState::Running;
      (result_tx, result_rx)
    };

    let workers = (0..self.worker_count)
      .map(|worker_id| {
        let shared = Arc::clone(&self.shared);
        let task_rx = self.task_rx.clone();
        let result_tx = result_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { shared.run_worker(worker_id, task_rx, result_tx, cancel).await })
      })
      .collect();
    drop(result_tx);

    let publisher = {
      let shared = Arc::clone(&self.shared);
      let cancel = cancel.clone();
      tokio::spawn(async move { shared.run_publisher(result_rx, cancel).await })
    };

    *self.loops.lock() = Some(LoopHandles { workers, publisher });

    info!(
      pool = %self.shared.name,
      workers = self.worker_count,
      buffer = self.buffer_size,
      "worker pool started"
    );
    Ok(())
  }

  /// Non-blocking admission. Fails with `QueueFull` instead of waiting for
  /// space. Only accepted tasks are counted as submitted.
  pub fn submit_task(&self, cancel: &CancellationToken, task: Task) -> Result<()> {
    if *self.state.lock() != PoolState::Running {
      return Err(WorkerError::NotRunning);
    }
    if cancel.is_cancelled() {
      return Err(WorkerError::Cancelled);
    }

    match self.task_tx.try_send(task) {
      Ok(()) => {
        // Counted after the send, so a snapshot may briefly show processed > submitted.
        self.shared.stats.record_submission();
        Ok(())
      }
      Err(async_channel::TrySendError::Full(task)) => {
        warn!(pool = %self.shared.name, task_id = %task.id, "task queue full, rejecting task");
        Err(WorkerError::QueueFull)
      }
      Err(async_channel::TrySendError::Closed(_)) => Err(WorkerError::NotRunning),
    }
  }

  /// Closes intake and waits for the loops to drain, bounded by the configured
  /// shutdown timeout and by `cancel`.
  ///
  /// On timeout the loops are left running detached; they are not aborted.
  /// A second call returns `NotRunning`.
  pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<()> {
    let loops = {
      let mut state = self.state.lock();
      if *state != PoolState::Running {
        return Err(WorkerError::NotRunning);
      }
      *state = PoolState::ShuttingDown;
      self.loops.lock().take()
    };

    info!(pool = %self.shared.name, "shutting down worker pool");
    self.task_tx.close();
    let result_tx = self.result_tx.lock().take();

    let name = self.shared.name.clone();
    let drain = async move {
      if let Some(LoopHandles { workers, publisher }) = loops {
        for handle in workers {
          if let Err(e) = handle.await {
            error!(pool = %name, error = %e, "worker loop ended abnormally");
          }
        }
        // Last sender gone: the publish loop drains what is left and exits.
        drop(result_tx);
        if let Err(e) = publisher.await {
          error!(pool = %name, error = %e, "result publisher ended abnormally");
        }
      }
    };

    let outcome = tokio::select! {
      _ = drain => Ok(()),
      _ = tokio::time::sleep(self.shutdown_timeout) => Err(WorkerError::ShutdownTimeout),
      _ = cancel.cancelled() => Err(WorkerError::ShutdownTimeout),
    };
    *self.state.lock() = PoolState::Stopped;

    match outcome {
      Ok(()) => {
        self.shared.stats.stop();
        info!(
          pool = %self.shared.name,
          total_submitted = self.shared.stats.submitted(),
          total_processed = self.shared.stats.processed(),
          total_failed = self.shared.stats.failed(),
          "worker pool shutdown complete"
        );
        Ok(())
      }
      Err(e) => {
        warn!(
          pool = %self.shared.name,
          timeout = ?self.shutdown_timeout,
          "shutdown timed out, leaving loops detached"
        );
        Err(e)
      }
    }
  }

  pub fn is_running(&self) -> bool {
    *self.state.lock() == PoolState::Running
  }

  pub fn state(&self) -> PoolState {
    *self.state.lock()
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  /// Tasks admitted but not yet picked up by a worker.
  pub fn queued(&self) -> usize {
    self.task_tx.len()
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.shared.stats.snapshot()
  }

  pub fn stats_handle(&self) -> Arc<WorkerStats> {
    Arc::clone(&self.shared.stats)
  }

  pub fn workers(&self) -> Vec<WorkerInfoSnapshot> {
    self.shared.registry.snapshot()
  }
}

impl Shared {
  async fn run_worker(
    &self,
    worker_id: usize,
    task_rx: async_channel::Receiver<Task>,
    result_tx: mpsc::Sender<TaskResult>,
    cancel: CancellationToken,
  ) {
    self.registry.register(worker_id);
    info!(pool = %self.name, worker_id, "worker started");

    loop {
      let task = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          info!(pool = %self.name, worker_id, "worker stopping: cancelled");
          break;
        }
        received = task_rx.recv() => match received {
          Ok(task) => task,
          Err(_) => {
            info!(pool = %self.name, worker_id, "task channel closed");
            break;
          }
        },
      };
      self.process_task(worker_id, task, &result_tx, &cancel).await;
    }

    self.registry.set_active(worker_id, false);
  }

  async fn process_task(
    &self,
    worker_id: usize,
    mut task: Task,
    result_tx: &mpsc::Sender<TaskResult>,
    cancel: &CancellationToken,
  ) {
    let started = Instant::now();
    let _in_flight = InFlight::enter(self, worker_id, &task.id);

    info!(
      pool = %self.name,
      worker_id,
      task_id = %task.id,
      task_type = %task.task_type,
      "processing task"
    );

    let task_cancel = cancel.child_token();
    let deadline = tokio::time::Instant::now() + self.process_timeout;
    let outcome = self.execute_task(&mut task, &task_cancel, deadline, cancel).await;
    task_cancel.cancel();

    let result = match outcome {
      Ok(output) => {
        let duration = started.elapsed();
        self.stats.record_processed(duration);
        TaskResult::success(&task.id, output, duration)
      }
      Err(err) => {
        self.stats.record_failed();
        if task.retries > 0 {
          self.stats.record_retry();
        }
        let message = format!("{:#}", err);
        error!(
          pool = %self.name,
          task_id = %task.id,
          retries = task.retries,
          error = %message,
          "task execution failed"
        );
        TaskResult::failure(&task.id, message, started.elapsed())
      }
    };

    self.send_result(result, result_tx, cancel);
  }

  /// Processing -> execute -> Completed. A failed first status update aborts
  /// before execution. A failed execution is marked Failed on a best-effort
  /// basis.
  async fn execute_task(
    &self,
    task: &mut Task,
    task_cancel: &CancellationToken,
    deadline: tokio::time::Instant,
    cancel: &CancellationToken,
  ) -> anyhow::Result<TaskOutput> {
    self
      .set_status(task, TaskStatus::Processing, task_cancel, deadline)
      .await
      .context("update status")?;

    // Terminal updates get their own deadline so an execution that used up the
    // task budget can still be recorded.
    let terminal_deadline = || tokio::time::Instant::now() + self.process_timeout;

    match bounded(task_cancel, deadline, self.executor.execute(task)).await {
      Ok(output) => {
        self
          .set_status(task, TaskStatus::Completed, cancel, terminal_deadline())
          .await
          .context("update completed status")?;
        Ok(output)
      }
      Err(err) => {
        if let Err(update_err) = self
          .set_status(task, TaskStatus::Failed, cancel, terminal_deadline())
          .await
        {
          error!(
            pool = %self.name,
            task_id = %task.id,
            error = %update_err,
            "failed to update task status"
          );
        }
        Err(err.context("execute task"))
      }
    }
  }

  async fn set_status(
    &self,
    task: &mut Task,
    to: TaskStatus,
    cancel: &CancellationToken,
    deadline: tokio::time::Instant,
  ) -> anyhow::Result<()> {
    if !task.can_transition(to) {
      return Err(WorkerError::InvalidStatus(format!("{} -> {}", task.status, to)).into());
    }
    bounded(cancel, deadline, self.repository.update_status(&task.id, to)).await?;
    task.transition(to);
    Ok(())
  }

  /// Never blocks: a full channel drops the result.
  fn send_result(&self, result: TaskResult, result_tx: &mpsc::Sender<TaskResult>, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
      warn!(pool = %self.name, task_id = %result.task_id(), "cancelled, dropping result");
      return;
    }
    match result_tx.try_send(result) {
      Ok(()) => {}
      Err(mpsc::error::TrySendError::Full(result)) => {
        error!(pool = %self.name, task_id = %result.task_id(), "result channel full, dropping result");
      }
      Err(mpsc::error::TrySendError::Closed(result)) => {
        warn!(pool = %self.name, task_id = %result.task_id(), "result channel closed, dropping result");
      }
    }
  }

  async fn run_publisher(&self, mut result_rx: mpsc::Receiver<TaskResult>, cancel: CancellationToken) {
    loop {
      let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          info!(pool = %self.name, "result publisher stopping");
          break;
        }
        received = result_rx.recv() => match received {
          Some(result) => result,
          None => {
            info!(pool = %self.name, "result channel closed");
            break;
          }
        },
      };
      self.publish_result(&result, &cancel).await;
    }
  }

  async fn publish_result(&self, result: &TaskResult, cancel: &CancellationToken) {
    let payload = match encode_result(result) {
      Ok(payload) => payload,
      Err(e) => {
        error!(pool = %self.name, task_id = %result.task_id(), error = %e, "failed to encode result");
        return;
      }
    };

    let outcome = tokio::select! {
      _ = cancel.cancelled() => Err(anyhow::Error::new(WorkerError::Cancelled)),
      published = self.publisher.publish(RESULT_TOPIC, &payload) => published,
    };

    match outcome {
      Ok(()) => info!(
        pool = %self.name,
        task_id = %result.task_id(),
        success = result.is_success(),
        "result published"
      ),
      Err(e) => error!(
        pool = %self.name,
        task_id = %result.task_id(),
        error = %e,
        "failed to publish result"
      ),
    }
  }
}

/// Races `fut` against cancellation and a deadline.
async fn bounded<T, F>(cancel: &CancellationToken, deadline: tokio::time::Instant, fut: F) -> anyhow::Result<T>
where
  F: Future<Output = anyhow::Result<T>>,
{
  tokio::select! {
    _ = cancel.cancelled() => Err(WorkerError::Cancelled.into()),
    outcome = tokio::time::timeout_at(deadline, fut) => match outcome {
      Ok(inner) => inner,
      Err(_) => Err(WorkerError::ProcessingTimeout.into()),
    },
  }
}

/// Keeps the active gauge and the registry's current task in step with one
/// task's lifetime, including when the worker future is dropped mid-task.
struct InFlight<'a> {
  shared: &'a Shared,
  worker_id: usize,
}

impl<'a> InFlight<'a> {
  fn enter(shared: &'a Shared, worker_id: usize, task_id: &str) -> Self {
    shared.stats.increment_active();
    shared.registry.set_task(worker_id, task_id);
    Self { shared, worker_id }
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.shared.stats.decrement_active();
    self.shared.registry.clear_task(self.worker_id);
  }
}
