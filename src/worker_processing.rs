use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map};
use tokio::time::sleep;
use tracing::info;

use crate::collaborators::TaskExecutor;
use crate::models::{Task, TaskOutput};

/// Progress checkpoints for each supported task type, in percent.
pub fn progress_steps(task_type: &str) -> Option<&'static [u8]> {
  match task_type {
    "email" => Some(&[20, 40, 60, 80]),
    "video" => Some(&[25, 50, 75]),
    "image" => Some(&[50]),
    _ => None,
  }
}

/// Stand-in executor that walks a task through its progress checkpoints,
/// sleeping `step_delay` before each one.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
  step_delay: Duration,
}

impl SimulatedExecutor {
  pub fn new(step_delay: Duration) -> Self {
    Self { step_delay }
  }
}

impl Default for SimulatedExecutor {
  fn default() -> Self {
    Self::new(Duration::from_secs(3))
  }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
  async fn execute(&self, task: &Task) -> Result<TaskOutput> {
    let steps = progress_steps(&task.task_type)
      .ok_or_else(|| anyhow!("Unknown task type: {}", task.task_type))?;
    info!(task_id = %task.id, "Processing {} task", task.task_type);

    for progress in steps {
      sleep(self.step_delay).await;
      info!(task_id = %task.id, "{} task progress {}%", task.task_type, progress);
    }
    sleep(self.step_delay).await;
    info!(task_id = %task.id, "Completed {} task", task.task_type);

    let mut output = Map::new();
    output.insert("task_type".into(), json!(task.task_type));
    output.insert("progress".into(), json!(100));
    output.insert("steps".into(), json!(steps.len() + 1));
    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn executor() -> SimulatedExecutor {
    SimulatedExecutor::new(Duration::from_millis(1))
  }

  #[tokio::test]
  async fn test_email_task_completes() {
    let task = Task::new("email", Map::new());
    let output = executor().execute(&task).await.unwrap();
    assert_eq!(output["progress"], json!(100));
    assert_eq!(output["steps"], json!(5));
    assert_eq!(output["task_type"], json!("email"));
  }

  #[tokio::test]
  async fn test_image_task_has_single_checkpoint() {
    let task = Task::new("image", Map::new());
    let output = executor().execute(&task).await.unwrap();
    assert_eq!(output["steps"], json!(2));
  }

  #[tokio::test]
  async fn test_unknown_type_fails() {
    let task = Task::new("fax", Map::new());
    let err = executor().execute(&task).await.unwrap_err();
    assert_eq!(err.to_string(), "Unknown task type: fax");
  }

  #[test]
  fn test_progress_steps() {
    assert_eq!(progress_steps("video"), Some(&[25u8, 50, 75][..]));
    assert!(progress_steps("").is_none());
  }
}
