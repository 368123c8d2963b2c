use std::collections::BTreeMap;

use serde_json::Map;

use crate::models::{Task, TaskStatus};

/// Lazy filters and projections over borrowed tasks.
pub trait TaskIterExt<'a>: Iterator<Item = &'a Task> + Sized {
  fn with_status(self, status: TaskStatus) -> impl Iterator<Item = &'a Task> {
    self.filter(move |task| task.status == status)
  }

  fn of_type(self, task_type: &'a str) -> impl Iterator<Item = &'a Task> {
    self.filter(move |task| task.task_type == task_type)
  }

  fn ids(self) -> impl Iterator<Item = &'a str> {
    self.map(|task| task.id.as_str())
  }
}

impl<'a, I> TaskIterExt<'a> for I where I: Iterator<Item = &'a Task> {}

pub fn group_by_status(tasks: &[Task]) -> BTreeMap<TaskStatus, Vec<&Task>> {
  let mut groups: BTreeMap<TaskStatus, Vec<&Task>> = BTreeMap::new();
  for task in tasks {
    groups.entry(task.status).or_default().push(task);
  }
  groups
}

/// Count of tasks per status, with every status present.
pub fn count_by_status<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> BTreeMap<TaskStatus, usize> {
  let mut counts: BTreeMap<TaskStatus, usize> = TaskStatus::ALL.into_iter().map(|s| (s, 0)).collect();
  for task in tasks {
    *counts.entry(task.status).or_default() += 1;
  }
  counts
}

/// Lazily generates `count` pending tasks named `generated-<n>`. Call again to
/// start over.
pub fn generate_tasks(task_type: &str, count: usize) -> impl Iterator<Item = Task> + '_ {
  (0..count).map(move |n| Task::new(task_type, Map::new()).with_id(format!("generated-{}", n)))
}
