use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::Task;

/// Concurrent task map keyed by task id.
#[derive(Debug, Default)]
pub struct TaskCache {
  tasks: DashMap<String, Task>,
}

impl TaskCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn store(&self, task: Task) {
    self.tasks.insert(task.id.clone(), task);
  }

  pub fn load(&self, id: &str) -> Option<Task> {
    self.tasks.get(id).map(|entry| entry.value().clone())
  }

  /// Returns the cached task and `true` if one already existed, otherwise
  /// stores `task` and returns it with `false`.
  pub fn load_or_store(&self, task: Task) -> (Task, bool) {
    match self.tasks.entry(task.id.clone()) {
      Entry::Occupied(entry) => (entry.get().clone(), true),
      Entry::Vacant(entry) => (entry.insert(task).value().clone(), false),
    }
  }

  /// Applies `f` to the cached task in place. Returns false if absent.
  pub fn update<F>(&self, id: &str, f: F) -> bool
  where
    F: FnOnce(&mut Task),
  {
    match self.tasks.get_mut(id) {
      Some(mut entry) => {
        f(entry.value_mut());
        true
      }
      None => false,
    }
  }

  pub fn remove(&self, id: &str) {
    self.tasks.remove(id);
  }

  /// Removes and returns the task in one step.
  pub fn take(&self, id: &str) -> Option<Task> {
    self.tasks.remove(id).map(|(_, task)| task)
  }

  /// Approximate under concurrent writes.
  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  /// Clones every cached task. Order is unspecified.
  pub fn snapshot(&self) -> Vec<Task> {
    self.tasks.iter().map(|entry| entry.value().clone()).collect()
  }
}
