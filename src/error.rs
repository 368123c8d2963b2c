use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors surfaced synchronously by the worker pool and request validation.
///
/// Per-task processing failures never show up here; they travel as failed
/// [`TaskResult`](crate::models::TaskResult)s instead.
#[derive(Debug, Error)]
pub enum WorkerError {
  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("worker already running")]
  AlreadyRunning,

  #[error("worker already stopped")]
  AlreadyStopped,

  #[error("worker not running")]
  NotRunning,

  #[error("operation cancelled")]
  Cancelled,

  #[error("task queue full")]
  QueueFull,

  #[error("shutdown timeout exceeded")]
  ShutdownTimeout,

  #[error("task processing timeout")]
  ProcessingTimeout,

  #[error("invalid task request: {0}")]
  InvalidRequest(String),

  #[error("invalid task status: {0}")]
  InvalidStatus(String),

  #[error("task not found: {0}")]
  TaskNotFound(String),
}

impl WorkerError {
  pub fn config(msg: impl Into<String>) -> Self {
    WorkerError::Config(msg.into())
  }

  pub fn invalid_request(msg: impl Into<String>) -> Self {
    WorkerError::InvalidRequest(msg.into())
  }
}
