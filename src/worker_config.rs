use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{MessagePublisher, TaskExecutor, TaskRepository};
use crate::error::{Result, WorkerError};
use crate::stats::WorkerStats;

pub const DEFAULT_WORKER_COUNT: usize = 5;
pub const DEFAULT_BUFFER_SIZE: usize = 100;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POOL_NAME: &str = "taskqueue";

/// Worker pool configuration. Zero values are replaced with defaults when the
/// pool is built.
#[derive(Clone, Default)]
pub struct WorkerConfig {
  pub repository: Option<Arc<dyn TaskRepository>>,
  pub executor: Option<Arc<dyn TaskExecutor>>,
  pub publisher: Option<Arc<dyn MessagePublisher>>,
  /// Shared counters; a fresh set is created when absent.
  pub stats: Option<Arc<WorkerStats>>,
  /// Label attached to every log line the pool emits.
  pub name: String,
  pub worker_count: usize,
  pub buffer_size: usize,
  pub shutdown_timeout: Duration,
  pub process_timeout: Duration,
}

/// Validated configuration with every default applied.
pub(crate) struct ResolvedConfig {
  pub repository: Arc<dyn TaskRepository>,
  pub executor: Arc<dyn TaskExecutor>,
  pub publisher: Arc<dyn MessagePublisher>,
  pub stats: Arc<WorkerStats>,
  pub name: String,
  pub worker_count: usize,
  pub buffer_size: usize,
  pub shutdown_timeout: Duration,
  pub process_timeout: Duration,
}

impl WorkerConfig {
  pub fn new(
    repository: Arc<dyn TaskRepository>,
    executor: Arc<dyn TaskExecutor>,
    publisher: Arc<dyn MessagePublisher>,
  ) -> Self {
    Self {
      repository: Some(repository),
      executor: Some(executor),
      publisher: Some(publisher),
      ..Default::default()
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
    self.stats = Some(stats);
    self
  }

  pub fn with_worker_count(mut self, count: usize) -> Self {
    self.worker_count = count;
    self
  }

  pub fn with_buffer_size(mut self, size: usize) -> Self {
    self.buffer_size = size;
    self
  }

  pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
    self.shutdown_timeout = timeout;
    self
  }

  pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
    self.process_timeout = timeout;
    self
  }

  pub(crate) fn resolve(self) -> Result<ResolvedConfig> {
    let repository = self
      .repository
      .ok_or_else(|| WorkerError::config("repository is required"))?;
    let executor = self
      .executor
      .ok_or_else(|| WorkerError::config("executor is required"))?;
    let publisher = self
      .publisher
      .ok_or_else(|| WorkerError::config("publisher is required"))?;

    Ok(ResolvedConfig {
      repository,
      executor,
      publisher,
      stats: self.stats.unwrap_or_default(),
      name: if self.name.is_empty() { DEFAULT_POOL_NAME.to_string() } else { self.name },
      worker_count: non_zero_or(self.worker_count, DEFAULT_WORKER_COUNT),
      buffer_size: non_zero_or(self.buffer_size, DEFAULT_BUFFER_SIZE),
      shutdown_timeout: non_zero_duration_or(self.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT),
      process_timeout: non_zero_duration_or(self.process_timeout, DEFAULT_PROCESS_TIMEOUT),
    })
  }
}

impl fmt::Debug for WorkerConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerConfig")
      .field("repository", &self.repository.is_some())
      .field("executor", &self.executor.is_some())
      .field("publisher", &self.publisher.is_some())
      .field("name", &self.name)
      .field("worker_count", &self.worker_count)
      .field("buffer_size", &self.buffer_size)
      .field("shutdown_timeout", &self.shutdown_timeout)
      .field("process_timeout", &self.process_timeout)
      .finish()
  }
}

fn non_zero_or(value: usize, default: usize) -> usize {
  if value == 0 { default } else { value }
}

fn non_zero_duration_or(value: Duration, default: Duration) -> Duration {
  if value.is_zero() { default } else { value }
}
