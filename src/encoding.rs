use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Task, TaskResult};

/// Topic every task result is published under.
pub const RESULT_TOPIC: &str = "task.results";
/// Queue the API enqueues new tasks on and the worker consumes from.
pub const TASK_QUEUE: &str = "task_queue";

/// Wire form of a published [`TaskResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
  pub task_id: String,
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub duration_ms: u64,
  pub completed_at: DateTime<Utc>,
}

impl From<&TaskResult> for ResultMessage {
  fn from(result: &TaskResult) -> Self {
    Self {
      task_id: result.task_id().to_string(),
      success: result.is_success(),
      error: result.error().map(str::to_string),
      duration_ms: u64::try_from(result.duration().as_millis()).unwrap_or(u64::MAX),
      completed_at: result.completed_at(),
    }
  }
}

pub fn encode_result(result: &TaskResult) -> Result<Vec<u8>> {
  serde_json::to_vec(&ResultMessage::from(result)).context("encode task result")
}

pub fn decode_result(bytes: &[u8]) -> Result<ResultMessage> {
  serde_json::from_slice(bytes).context("decode task result")
}

pub fn encode_task(task: &Task) -> Result<Vec<u8>> {
  serde_json::to_vec(task).with_context(|| format!("encode task {}", task.id))
}

pub fn decode_task(bytes: &[u8]) -> Result<Task> {
  serde_json::from_slice(bytes).context("decode task")
}

/// Encodes tasks to JSON through one reusable scratch buffer.
#[derive(Debug, Default)]
pub struct TaskEncoder {
  buf: Vec<u8>,
}

impl TaskEncoder {
  pub fn new() -> Self {
    Self { buf: Vec::with_capacity(4096) }
  }

  pub fn encode(&mut self, task: &Task) -> Result<Vec<u8>> {
    self.buf.clear();
    serde_json::to_writer(&mut self.buf, task)
      .with_context(|| format!("encode task {}", task.id))?;
    Ok(self.buf.clone())
  }

  /// Fails on the first task that cannot be encoded.
  pub fn encode_batch(&mut self, tasks: &[Task]) -> Result<Vec<Vec<u8>>> {
    tasks.iter().map(|task| self.encode(task)).collect()
  }
}
