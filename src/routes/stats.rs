use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use warp::Filter;

use crate::registry::WorkerInfoSnapshot;
use crate::stats::StatsSnapshot;
use crate::worker_pool::WorkerPool;

#[derive(Debug, Serialize)]
pub struct PoolStatsResponse {
  pub name: String,
  pub state: String,
  pub worker_count: usize,
  pub queued: usize,
  pub stats: StatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct WorkersResponse {
  pub active: usize,
  pub workers: Vec<WorkerInfoSnapshot>,
}

fn with_pool(pool: Arc<WorkerPool>) -> impl Filter<Extract = (Arc<WorkerPool>,), Error = Infallible> + Clone {
  warp::any().map(move || pool.clone())
}

pub fn stats_route(
  pool: Arc<WorkerPool>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("stats")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_pool(pool))
    .map(|pool: Arc<WorkerPool>| {
      warp::reply::json(&PoolStatsResponse {
        name: pool.name().to_string(),
        state: format!("{:?}", pool.state()),
        worker_count: pool.worker_count(),
        queued: pool.queued(),
        stats: pool.stats(),
      })
    })
}

pub fn workers_route(
  pool: Arc<WorkerPool>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("workers")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_pool(pool))
    .map(|pool: Arc<WorkerPool>| {
      let workers = pool.workers();
      let active = workers.iter().filter(|w| w.active).count();
      warp::reply::json(&WorkersResponse { active, workers })
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::routes::stats_routes;
  use crate::storage::InMemoryTaskRepository;
  use crate::worker_config::WorkerConfig;
  use crate::worker_processing::SimulatedExecutor;
  use async_trait::async_trait;
  use serde_json::Value;
  use std::time::Duration;
  use tokio_util::sync::CancellationToken;

  struct DropPublisher;

  #[async_trait]
  impl crate::collaborators::MessagePublisher for DropPublisher {
    async fn publish(&self, _topic: &str, _payload: &[u8]) -> anyhow::Result<()> {
      Ok(())
    }
  }

  fn pool(workers: usize) -> Arc<WorkerPool> {
    let config = WorkerConfig::new(
      Arc::new(InMemoryTaskRepository::new()),
      Arc::new(SimulatedExecutor::new(Duration::from_millis(1))),
      Arc::new(DropPublisher),
    )
    .with_name("stats-test")
    .with_worker_count(workers);
    Arc::new(WorkerPool::new(config).unwrap())
  }

  #[tokio::test]
  async fn test_stats_route() {
    let api = stats_routes(pool(3));
    let resp = warp::test::request().path("/stats").reply(&api).await;
    assert_eq!(resp.status(), 200);

    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["name"], "stats-test");
    assert_eq!(body["state"], "Idle");
    assert_eq!(body["worker_count"], 3);
    assert_eq!(body["stats"]["submitted"], 0);
  }

  #[tokio::test]
  async fn test_workers_route_lists_started_loops() {
    let pool = pool(2);
    let cancel = CancellationToken::new();
    pool.start(&cancel).unwrap();

    let api = stats_routes(pool.clone());
    let mut listed = 0;
    for _ in 0..50 {
      let resp = warp::test::request().path("/workers").reply(&api).await;
      let body: Value = serde_json::from_slice(resp.body()).unwrap();
      listed = body["workers"].as_array().map(Vec::len).unwrap_or(0);
      if listed == 2 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(listed, 2);

    pool.shutdown(&cancel).await.unwrap();
  }
}
