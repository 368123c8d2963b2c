use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::collaborators::TaskRepository;
use crate::error::WorkerError;
use crate::iterators::TaskIterExt;
use crate::models::{Task, TaskStatus};
use crate::task_cache::TaskCache;

/// Process-local repository. Rejects status changes that skip the lifecycle.
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
  tasks: TaskCache,
}

impl InMemoryTaskRepository {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn all(&self) -> Vec<Task> {
    self.tasks.snapshot()
  }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
  async fn save(&self, task: &Task) -> Result<()> {
    self.tasks.store(task.clone());
    Ok(())
  }

  async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
    Ok(self.tasks.load(id))
  }

  async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
    let mut from = None;
    let found = self.tasks.update(id, |task| {
      if !task.transition(status) {
        from = Some(task.status);
      }
    });
    if !found {
      return Err(WorkerError::TaskNotFound(id.to_string()).into());
    }
    if let Some(from) = from {
      bail!(WorkerError::InvalidStatus(format!("{} -> {}", from, status)));
    }
    Ok(())
  }

  async fn list_pending(&self, limit: usize) -> Result<Vec<Task>> {
    let mut tasks = self.tasks.snapshot();
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(
      tasks
        .iter()
        .with_status(TaskStatus::Pending)
        .take(limit)
        .cloned()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Map;

  #[tokio::test]
  async fn test_save_and_get() {
    let repo = InMemoryTaskRepository::new();
    let task = Task::new("email", Map::new()).with_id("t-1");
    repo.save(&task).await.unwrap();

    assert_eq!(repo.get_by_id("t-1").await.unwrap(), Some(task));
    assert!(repo.get_by_id("nope").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_update_status_follows_lifecycle() {
    let repo = InMemoryTaskRepository::new();
    repo.save(&Task::new("email", Map::new()).with_id("t-1")).await.unwrap();

    assert!(repo.update_status("t-1", TaskStatus::Completed).await.is_err());
    repo.update_status("t-1", TaskStatus::Processing).await.unwrap();
    repo.update_status("t-1", TaskStatus::Completed).await.unwrap();
    assert_eq!(
      repo.get_by_id("t-1").await.unwrap().unwrap().status,
      TaskStatus::Completed
    );

    let err = repo.update_status("missing", TaskStatus::Processing).await.unwrap_err();
    assert!(err.to_string().contains("task not found"));
  }

  #[tokio::test]
  async fn test_list_pending_respects_limit() {
    let repo = InMemoryTaskRepository::new();
    for i in 0..5 {
      repo.save(&Task::new("email", Map::new()).with_id(format!("t-{}", i))).await.unwrap();
    }
    repo.update_status("t-0", TaskStatus::Processing).await.unwrap();

    let pending = repo.list_pending(3).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|t| t.status == TaskStatus::Pending));
    assert!(pending.iter().all(|t| t.id != "t-0"));
  }
}
