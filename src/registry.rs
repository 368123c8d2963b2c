use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

/// Live state of one worker loop.
#[derive(Debug)]
struct WorkerInfo {
  started_at: DateTime<Utc>,
  tasks_handled: AtomicU64,
  active: AtomicBool,
  current_task: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfoSnapshot {
  pub worker_id: usize,
  pub started_at: DateTime<Utc>,
  pub tasks_handled: u64,
  pub active: bool,
  pub current_task: Option<String>,
}

/// Tracks the worker loops of a pool. Each loop owns its own key, so loops
/// never contend on the same entry.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
  workers: DashMap<usize, WorkerInfo>,
}

impl WorkerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, worker_id: usize) {
    self.workers.insert(
      worker_id,
      WorkerInfo {
        started_at: Utc::now(),
        tasks_handled: AtomicU64::new(0),
        active: AtomicBool::new(true),
        current_task: Mutex::new(None),
      },
    );
  }

  pub fn unregister(&self, worker_id: usize) {
    self.workers.remove(&worker_id);
  }

  pub fn set_task(&self, worker_id: usize, task_id: &str) {
    if let Some(info) = self.workers.get(&worker_id) {
      *info.current_task.lock() = Some(task_id.to_string());
      info.tasks_handled.fetch_add(1, Ordering::Relaxed);
    }
  }

  pub fn clear_task(&self, worker_id: usize) {
    if let Some(info) = self.workers.get(&worker_id) {
      *info.current_task.lock() = None;
    }
  }

  pub fn set_active(&self, worker_id: usize, active: bool) {
    if let Some(info) = self.workers.get(&worker_id) {
      info.active.store(active, Ordering::Relaxed);
    }
  }

  pub fn active_count(&self) -> usize {
    self
      .workers
      .iter()
      .filter(|entry| entry.active.load(Ordering::Relaxed))
      .count()
  }

  pub fn len(&self) -> usize {
    self.workers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.workers.is_empty()
  }

  pub fn get(&self, worker_id: usize) -> Option<WorkerInfoSnapshot> {
    self
      .workers
      .get(&worker_id)
      .map(|entry| snapshot_of(*entry.key(), entry.value()))
  }

  /// Snapshot of every registered loop, ordered by worker id.
  pub fn snapshot(&self) -> Vec<WorkerInfoSnapshot> {
    let mut workers: Vec<_> = self
      .workers
      .iter()
      .map(|entry| snapshot_of(*entry.key(), entry.value()))
      .collect();
    workers.sort_by_key(|w| w.worker_id);
    workers
  }
}

fn snapshot_of(worker_id: usize, info: &WorkerInfo) -> WorkerInfoSnapshot {
  WorkerInfoSnapshot {
    worker_id,
    started_at: info.started_at,
    tasks_handled: info.tasks_handled.load(Ordering::Relaxed),
    active: info.active.load(Ordering::Relaxed),
    current_task: info.current_task.lock().clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_register_and_track_tasks() {
    let registry = WorkerRegistry::new();
    registry.register(0);
    registry.register(1);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.active_count(), 2);

    registry.set_task(1, "t-1");
    let info = registry.get(1).unwrap();
    assert_eq!(info.current_task.as_deref(), Some("t-1"));
    assert_eq!(info.tasks_handled, 1);

    registry.clear_task(1);
    registry.set_task(1, "t-2");
    registry.clear_task(1);
    let info = registry.get(1).unwrap();
    assert!(info.current_task.is_none());
    assert_eq!(info.tasks_handled, 2);
  }

  #[test]
  fn test_unknown_worker_is_ignored() {
    let registry = WorkerRegistry::new();
    registry.set_task(7, "t-1");
    registry.clear_task(7);
    assert!(registry.get(7).is_none());
    assert!(registry.is_empty());
  }

  #[test]
  fn test_inactive_and_unregister() {
    let registry = WorkerRegistry::new();
    for id in 0..3 {
      registry.register(id);
    }
    registry.set_active(2, false);
    assert_eq!(registry.active_count(), 2);

    registry.unregister(0);
    let ids: Vec<_> = registry.snapshot().into_iter().map(|w| w.worker_id).collect();
    assert_eq!(ids, vec![1, 2]);
  }
}
