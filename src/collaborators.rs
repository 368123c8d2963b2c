//! Contracts the worker pool depends on but does not implement.
//!
//! Cancellation is by drop: the pool races each call against the per-task
//! deadline and the pool token, so implementations need no token of their own.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Task, TaskOutput, TaskStatus};

/// Persistence for tasks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
  async fn save(&self, task: &Task) -> Result<()>;

  async fn get_by_id(&self, id: &str) -> Result<Option<Task>>;

  async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()>;

  /// Oldest pending tasks first, at most `limit` of them.
  async fn list_pending(&self, limit: usize) -> Result<Vec<Task>>;
}

/// Runs a task. May take arbitrarily long; the pool enforces the timeout.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
  async fn execute(&self, task: &Task) -> Result<TaskOutput>;
}

/// Emits an opaque payload to a downstream sink.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
  async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}
