mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use common::{eventually, RecordingPublisher};
use taskqueue::encoding::{decode_task, TASK_QUEUE};
use taskqueue::routes::{routes, stats_routes};
use taskqueue::storage::InMemoryTaskRepository;
use taskqueue::worker_processing::SimulatedExecutor;
use taskqueue::{MessagePublisher, TaskRepository, TaskStatus, WorkerConfig, WorkerPool};

#[derive(Default)]
struct QueueCapture {
  inner: RecordingPublisher,
  tasks: parking_lot::Mutex<Vec<Vec<u8>>>,
}

#[async_trait::async_trait]
impl MessagePublisher for QueueCapture {
  async fn publish(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
    if topic == TASK_QUEUE {
      self.tasks.lock().push(payload.to_vec());
    }
    self.inner.publish(topic, payload).await
  }
}

#[tokio::test]
async fn test_submit_process_and_query_over_http() {
  let repository = Arc::new(InMemoryTaskRepository::new());
  let broker = Arc::new(QueueCapture::default());

  let (api_addr, api_server) = warp::serve(routes(repository.clone(), broker.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(api_server);

  let pool = Arc::new(
    WorkerPool::new(
      WorkerConfig::new(
        repository.clone(),
        Arc::new(SimulatedExecutor::new(Duration::from_millis(1))),
        broker.clone(),
      )
      .with_worker_count(2),
    )
    .unwrap(),
  );
  let cancel = CancellationToken::new();
  pool.start(&cancel).unwrap();

  let (stats_addr, stats_server) = warp::serve(stats_routes(pool.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(stats_server);

  let client = reqwest::Client::new();
  let resp = client
    .post(format!("http://{}/submit", api_addr))
    .json(&json!({
      "task_type": "email",
      "payload": {"from": "a@b.com", "to": "c@d.com", "subject": "Hello", "content": "Hi there"}
    }))
    .send()
    .await
    .unwrap();
  assert!(resp.status().is_success());
  let body: Value = resp.json().await.unwrap();
  let task_id = body["task_id"].as_str().unwrap().to_string();

  let queued = broker.tasks.lock().clone();
  assert_eq!(queued.len(), 1);
  let task = decode_task(&queued[0]).unwrap();
  assert_eq!(task.id, task_id);
  pool.submit_task(&cancel, task).unwrap();

  let mut status = TaskStatus::Pending;
  for _ in 0..100 {
    status = repository.get_by_id(&task_id).await.unwrap().unwrap().status;
    if status == TaskStatus::Completed {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert_eq!(status, TaskStatus::Completed);

  let fetched: Value = client
    .get(format!("http://{}/tasks/{}", api_addr, task_id))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(fetched["status"], "completed");

  let missing = client
    .get(format!("http://{}/tasks/does-not-exist", api_addr))
    .send()
    .await
    .unwrap();
  assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

  assert!(eventually(Duration::from_secs(1), || pool.stats().processed == 1).await);
  let stats: Value = client
    .get(format!("http://{}/stats", stats_addr))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(stats["stats"]["submitted"], 1);
  assert_eq!(stats["stats"]["processed"], 1);
  assert_eq!(stats["state"], "Running");

  pool.shutdown(&cancel).await.unwrap();
  assert_eq!(broker.inner.results().len(), 1);
  assert!(broker.inner.results()[0].success);
}
