use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, warn};
use warp::sse::Event;
use warp::Filter;

use super::tasks::with_repository;
use super::ApiError;
use crate::collaborators::TaskRepository;
use crate::models::TaskStatus;

#[derive(Debug, Deserialize)]
pub struct SseQuery {
  pub task_id: String,
}

pub fn sse_route(
  repository: Arc<dyn TaskRepository>,
  poll_interval: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("sse")
    .and(warp::path::end())
    .and(warp::get())
    .and(warp::query::<SseQuery>())
    .and(with_repository(repository))
    .and(warp::any().map(move || poll_interval))
    .and_then(handle_sse)
}

async fn handle_sse(
  query: SseQuery,
  repository: Arc<dyn TaskRepository>,
  poll_interval: Duration,
) -> Result<impl warp::Reply, warp::Rejection> {
  match repository.get_by_id(&query.task_id).await {
    Ok(Some(_)) => {}
    Ok(None) => {
      return Err(warp::reject::custom(ApiError::NotFound(format!(
        "task not found: {}",
        query.task_id
      ))));
    }
    Err(e) => {
      error!("Error fetching task status: {:?}", e);
      return Err(warp::reject::custom(ApiError::Internal("Failed to load task".into())));
    }
  }

  let stream = status_events(repository, query.task_id, poll_interval);
  Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}

struct Poll {
  repository: Arc<dyn TaskRepository>,
  task_id: String,
  ticker: Interval,
  finished: bool,
}

/// One `status` event per tick once the task has left Pending. The stream
/// ends after the first terminal status.
fn status_events(
  repository: Arc<dyn TaskRepository>,
  task_id: String,
  poll_interval: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
  let mut ticker = interval(poll_interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let poll = Poll { repository, task_id, ticker, finished: false };

  stream::unfold(poll, |mut poll| async move {
    while !poll.finished {
      poll.ticker.tick().await;
      let task = match poll.repository.get_by_id(&poll.task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
          warn!(task_id = %poll.task_id, "task disappeared while streaming");
          return None;
        }
        Err(e) => {
          error!("Error fetching task status: {:?}", e);
          continue;
        }
      };
      if task.status == TaskStatus::Pending {
        continue;
      }

      poll.finished = task.status.is_terminal();
      let data = json!({
        "task_id": task.id,
        "status": task.status,
        "updated_at": task.updated_at,
      });
      let event = Event::default().event("status").data(data.to_string());
      return Some((Ok(event), poll));
    }
    None
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::Task;
  use crate::storage::InMemoryTaskRepository;
  use futures::StreamExt;
  use serde_json::Map;

  #[tokio::test]
  async fn test_stream_ends_after_terminal_status() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let task = Task::new("email", Map::new()).with_id("t1");
    repo.save(&task).await.unwrap();

    let events = status_events(repo.clone(), "t1".into(), Duration::from_millis(5));
    tokio::pin!(events);

    repo.update_status("t1", TaskStatus::Processing).await.unwrap();
    assert!(events.next().await.is_some());

    repo.update_status("t1", TaskStatus::Completed).await.unwrap();
    let mut remaining = 0;
    while let Some(event) = events.next().await {
      assert!(event.is_ok());
      remaining += 1;
    }
    assert!(remaining >= 1);
  }

  #[tokio::test]
  async fn test_unknown_task_is_not_found() {
    let repo: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
    let filter = sse_route(repo, Duration::from_millis(5)).recover(super::super::handle_rejection);

    let resp = warp::test::request().path("/sse?task_id=nope").reply(&filter).await;
    assert_eq!(resp.status(), warp::http::StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn test_missing_query_is_bad_request() {
    let repo: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
    let filter = sse_route(repo, Duration::from_millis(5)).recover(super::super::handle_rejection);

    let resp = warp::test::request().path("/sse").reply(&filter).await;
    assert_eq!(resp.status(), warp::http::StatusCode::BAD_REQUEST);
  }
}
