use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::collaborators::{MessagePublisher, TaskRepository};
use crate::worker_pool::WorkerPool;

pub mod sse;
pub mod stats;
pub mod tasks;

pub const SSE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Rejection carrying the HTTP status the client should see.
#[derive(Debug)]
pub enum ApiError {
  BadRequest(String),
  NotFound(String),
  Internal(String),
}

impl warp::reject::Reject for ApiError {}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn message(&self) -> &str {
    match self {
      ApiError::BadRequest(m) | ApiError::NotFound(m) | ApiError::Internal(m) => m,
    }
  }
}

/// Public API: task submission, lookup and status streaming.
pub fn routes(
  repository: Arc<dyn TaskRepository>,
  publisher: Arc<dyn MessagePublisher>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
  tasks::submit_route(repository.clone(), publisher)
    .or(tasks::get_task_route(repository.clone()))
    .or(sse::sse_route(repository, SSE_POLL_INTERVAL))
    .recover(handle_rejection)
}

/// Introspection served by the worker process.
pub fn stats_routes(
  pool: Arc<WorkerPool>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
  stats::stats_route(pool.clone())
    .or(stats::workers_route(pool))
    .recover(handle_rejection)
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (status, message) = if err.is_not_found() {
    (StatusCode::NOT_FOUND, "Not Found".to_string())
  } else if let Some(api) = err.find::<ApiError>() {
    if let ApiError::Internal(m) = api {
      error!("Request failed: {}", m);
    }
    (api.status(), api.message().to_string())
  } else if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
  } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".to_string())
  } else {
    error!("Unhandled rejection: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
  };

  let body = warp::reply::json(&json!({ "error": message }));
  Ok(warp::reply::with_status(body, status))
}
