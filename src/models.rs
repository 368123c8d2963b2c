use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, WorkerError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_RETRY_LIMIT: u32 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;
pub const MAX_PRIORITY: u8 = 10;
/// Requests at or above this priority are marked urgent.
pub const URGENT_PRIORITY: u8 = 8;

/// Output produced by an executor for a single task.
pub type TaskOutput = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  Pending,
  Processing,
  Completed,
  Failed,
}

impl TaskStatus {
  pub const ALL: [TaskStatus; 4] = [
    TaskStatus::Pending,
    TaskStatus::Processing,
    TaskStatus::Completed,
    TaskStatus::Failed,
  ];

  /// Legal edges: Pending -> Processing, Processing -> Completed | Failed.
  pub fn can_transition(self, to: TaskStatus) -> bool {
    matches!(
      (self, to),
      (TaskStatus::Pending, TaskStatus::Processing)
        | (TaskStatus::Processing, TaskStatus::Completed)
        | (TaskStatus::Processing, TaskStatus::Failed)
    )
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, TaskStatus::Completed | TaskStatus::Failed)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      TaskStatus::Pending => "pending",
      TaskStatus::Processing => "processing",
      TaskStatus::Completed => "completed",
      TaskStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = WorkerError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(TaskStatus::Pending),
      "processing" => Ok(TaskStatus::Processing),
      "completed" => Ok(TaskStatus::Completed),
      "failed" => Ok(TaskStatus::Failed),
      other => Err(WorkerError::InvalidStatus(other.to_string())),
    }
  }
}

/// Bitwise task options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskFlags(u8);

impl TaskFlags {
  pub const NONE: TaskFlags = TaskFlags(0);
  pub const URGENT: TaskFlags = TaskFlags(1 << 0);
  pub const RETRYABLE: TaskFlags = TaskFlags(1 << 1);
  pub const LOGGED: TaskFlags = TaskFlags(1 << 2);
  pub const METRICS: TaskFlags = TaskFlags(1 << 3);

  pub const DEFAULT: TaskFlags = TaskFlags(Self::RETRYABLE.0 | Self::LOGGED.0);
  pub const URGENT_WITH_LOGS: TaskFlags =
    TaskFlags(Self::URGENT.0 | Self::LOGGED.0 | Self::METRICS.0);

  pub const fn from_bits(bits: u8) -> Self {
    TaskFlags(bits)
  }

  pub const fn bits(self) -> u8 {
    self.0
  }

  /// True if any bit of `flag` is set.
  pub const fn has(self, flag: TaskFlags) -> bool {
    self.0 & flag.0 != 0
  }

  pub fn set(&mut self, flag: TaskFlags) {
    self.0 |= flag.0;
  }

  pub fn clear(&mut self, flag: TaskFlags) {
    self.0 &= !flag.0;
  }

  pub fn toggle(&mut self, flag: TaskFlags) {
    self.0 ^= flag.0;
  }
}

impl BitOr for TaskFlags {
  type Output = TaskFlags;

  fn bitor(self, rhs: TaskFlags) -> TaskFlags {
    TaskFlags(self.0 | rhs.0)
  }
}

impl BitAnd for TaskFlags {
  type Output = TaskFlags;

  fn bitand(self, rhs: TaskFlags) -> TaskFlags {
    TaskFlags(self.0 & rhs.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub task_type: String,
  pub payload: Map<String, Value>,
  pub status: TaskStatus,
  pub retries: u32,
  pub max_retries: u32,
  pub flags: TaskFlags,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Task {
  /// A fresh pending task with a generated id.
  pub fn new(task_type: impl Into<String>, payload: Map<String, Value>) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4().to_string(),
      task_type: task_type.into(),
      payload,
      status: TaskStatus::Pending,
      retries: 0,
      max_retries: DEFAULT_MAX_RETRIES,
      flags: TaskFlags::NONE,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = id.into();
    self
  }

  pub fn with_flags(mut self, flags: TaskFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn can_transition(&self, to: TaskStatus) -> bool {
    self.status.can_transition(to)
  }

  /// Applies `to` if the edge is legal. Returns false and leaves the task
  /// untouched otherwise.
  pub fn transition(&mut self, to: TaskStatus) -> bool {
    if !self.status.can_transition(to) {
      return false;
    }
    self.status = to;
    self.updated_at = Utc::now();
    true
  }

  pub fn has_flag(&self, flag: TaskFlags) -> bool {
    self.flags.has(flag)
  }

  pub fn set_flag(&mut self, flag: TaskFlags) {
    self.flags.set(flag);
  }

  pub fn clear_flag(&mut self, flag: TaskFlags) {
    self.flags.clear(flag);
  }

  pub fn toggle_flag(&mut self, flag: TaskFlags) {
    self.flags.toggle(flag);
  }

  pub fn is_urgent(&self) -> bool {
    self.has_flag(TaskFlags::URGENT)
  }

  pub fn is_retryable(&self) -> bool {
    self.has_flag(TaskFlags::RETRYABLE)
  }

  pub fn should_log_metrics(&self) -> bool {
    self.has_flag(TaskFlags::METRICS)
  }
}

impl fmt::Display for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Task[{}] Type={} Status={}", self.id, self.task_type, self.status)
  }
}

/// Outcome of processing one task. `error` is set iff `success` is false.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
  task_id: String,
  success: bool,
  output: TaskOutput,
  error: Option<String>,
  duration: Duration,
  completed_at: DateTime<Utc>,
}

impl TaskResult {
  pub fn success(task_id: impl Into<String>, output: TaskOutput, duration: Duration) -> Self {
    Self {
      task_id: task_id.into(),
      success: true,
      output,
      error: None,
      duration,
      completed_at: Utc::now(),
    }
  }

  pub fn failure(task_id: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
    Self {
      task_id: task_id.into(),
      success: false,
      output: TaskOutput::new(),
      error: Some(error.into()),
      duration,
      completed_at: Utc::now(),
    }
  }

  pub fn task_id(&self) -> &str {
    &self.task_id
  }

  pub fn is_success(&self) -> bool {
    self.success
  }

  pub fn output(&self) -> &TaskOutput {
    &self.output
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn duration(&self) -> Duration {
    self.duration
  }

  pub fn completed_at(&self) -> DateTime<Utc> {
    self.completed_at
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
  pub task_type: String,
  pub payload: Value,
  pub max_retries: Option<u32>,
  pub flags: Option<u8>,
  /// 1 (lowest) to 10; defaults to 5.
  pub priority: Option<u8>,
}

impl CreateTaskRequest {
  pub fn validate(&self) -> Result<()> {
    if self.task_type.trim().is_empty() {
      return Err(WorkerError::invalid_request("task type is required"));
    }
    if !self.payload.is_object() {
      return Err(WorkerError::invalid_request("task data is required"));
    }
    if let Some(max) = self.max_retries {
      if max > MAX_RETRY_LIMIT {
        return Err(WorkerError::invalid_request(format!(
          "max retries exceeds limit of {}",
          MAX_RETRY_LIMIT
        )));
      }
    }
    if let Some(priority) = self.priority {
      if !(1..=MAX_PRIORITY).contains(&priority) {
        return Err(WorkerError::invalid_request(format!(
          "priority must be between 1 and {}",
          MAX_PRIORITY
        )));
      }
    }
    Ok(())
  }

  pub fn into_task(self) -> Result<Task> {
    self.validate()?;
    let payload = match self.payload {
      Value::Object(map) => map,
      _ => return Err(WorkerError::invalid_request("task data is required")),
    };
    let mut flags = TaskFlags::from_bits(self.flags.unwrap_or(TaskFlags::DEFAULT.bits()));
    if self.priority.unwrap_or(DEFAULT_PRIORITY) >= URGENT_PRIORITY {
      flags.set(TaskFlags::URGENT);
    }
    Ok(
      Task::new(self.task_type, payload)
        .with_max_retries(self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))
        .with_flags(flags),
    )
  }
}
