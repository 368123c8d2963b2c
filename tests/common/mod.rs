#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map};

use taskqueue::encoding::{decode_result, ResultMessage};
use taskqueue::models::{Task, TaskOutput, TaskStatus};
use taskqueue::{MessagePublisher, TaskExecutor, TaskRepository, WorkerConfig};

/// Repository that accepts every call and remembers the status updates.
#[derive(Default)]
pub struct RecordingRepository {
  updates: Mutex<Vec<(String, TaskStatus)>>,
  fail_on: Mutex<Option<TaskStatus>>,
}

impl RecordingRepository {
  pub fn failing_on(status: TaskStatus) -> Self {
    let repo = Self::default();
    *repo.fail_on.lock() = Some(status);
    repo
  }

  pub fn updates(&self) -> Vec<(String, TaskStatus)> {
    self.updates.lock().clone()
  }

  pub fn statuses_for(&self, task_id: &str) -> Vec<TaskStatus> {
    self
      .updates
      .lock()
      .iter()
      .filter(|(id, _)| id == task_id)
      .map(|(_, status)| *status)
      .collect()
  }
}

#[async_trait]
impl TaskRepository for RecordingRepository {
  async fn save(&self, _task: &Task) -> Result<()> {
    Ok(())
  }

  async fn get_by_id(&self, _id: &str) -> Result<Option<Task>> {
    Ok(None)
  }

  async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
    if *self.fail_on.lock() == Some(status) {
      return Err(anyhow!("database unavailable"));
    }
    self.updates.lock().push((id.to_string(), status));
    Ok(())
  }

  async fn list_pending(&self, _limit: usize) -> Result<Vec<Task>> {
    Ok(Vec::new())
  }
}

#[derive(Debug, Clone)]
pub enum Behavior {
  Succeed,
  Fail(&'static str),
  Sleep(Duration),
}

pub struct MockExecutor {
  behavior: Behavior,
  executed: Mutex<Vec<String>>,
}

impl MockExecutor {
  pub fn new(behavior: Behavior) -> Self {
    Self { behavior, executed: Mutex::new(Vec::new()) }
  }

  pub fn executed(&self) -> Vec<String> {
    self.executed.lock().clone()
  }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
  async fn execute(&self, task: &Task) -> Result<TaskOutput> {
    self.executed.lock().push(task.id.clone());
    match &self.behavior {
      Behavior::Succeed => {}
      Behavior::Fail(msg) => return Err(anyhow!(*msg)),
      Behavior::Sleep(duration) => tokio::time::sleep(*duration).await,
    }
    let mut output = Map::new();
    output.insert("task_id".into(), json!(task.id));
    Ok(output)
  }
}

#[derive(Default)]
pub struct RecordingPublisher {
  messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
  pub fn topics(&self) -> Vec<String> {
    self.messages.lock().iter().map(|(topic, _)| topic.clone()).collect()
  }

  pub fn results(&self) -> Vec<ResultMessage> {
    self
      .messages
      .lock()
      .iter()
      .filter_map(|(_, payload)| decode_result(payload).ok())
      .collect()
  }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
  async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
    self.messages.lock().push((topic.to_string(), payload.to_vec()));
    Ok(())
  }
}

/// Publisher whose first call never returns in time.
#[derive(Default)]
pub struct StuckPublisher {
  calls: AtomicUsize,
}

impl StuckPublisher {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl MessagePublisher for StuckPublisher {
  async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    Ok(())
  }
}

/// Publisher that rejects every message.
#[derive(Default)]
pub struct FailingPublisher {
  calls: AtomicUsize,
}

impl FailingPublisher {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl MessagePublisher for FailingPublisher {
  async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Err(anyhow!("broker unavailable"))
  }
}

pub struct Harness {
  pub repository: Arc<RecordingRepository>,
  pub executor: Arc<MockExecutor>,
  pub publisher: Arc<RecordingPublisher>,
}

impl Harness {
  pub fn new(behavior: Behavior) -> Self {
    Self::with_repository(RecordingRepository::default(), behavior)
  }

  pub fn with_repository(repository: RecordingRepository, behavior: Behavior) -> Self {
    Self {
      repository: Arc::new(repository),
      executor: Arc::new(MockExecutor::new(behavior)),
      publisher: Arc::new(RecordingPublisher::default()),
    }
  }

  pub fn config(&self) -> WorkerConfig {
    self.config_with_publisher(self.publisher.clone())
  }

  pub fn config_with_publisher(&self, publisher: Arc<dyn MessagePublisher>) -> WorkerConfig {
    WorkerConfig::new(self.repository.clone(), self.executor.clone(), publisher)
      .with_name("test-pool")
  }
}

pub fn task(id: &str) -> Task {
  Task::new("email", Map::new()).with_id(id)
}

/// Polls `check` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
  F: FnMut() -> bool,
{
  let deadline = tokio::time::Instant::now() + within;
  while tokio::time::Instant::now() < deadline {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  check()
}
