use std::convert::Infallible;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use warp::Filter;

use super::ApiError;
use crate::collaborators::{MessagePublisher, TaskRepository};
use crate::encoding::{encode_task, TASK_QUEUE};
use crate::models::CreateTaskRequest;

#[derive(Debug, Serialize)]
pub struct TaskResponse {
  pub task_id: String,
  pub status: String,
  pub sse_url: String,
}

static SAFE_INPUT: LazyLock<Result<Regex, regex::Error>> =
  LazyLock::new(|| Regex::new(r"^[\w\s.,@!?\-]+$"));

fn sanitize_input(input: &str) -> bool {
  SAFE_INPUT.as_ref().is_ok_and(|re| re.is_match(input))
}

fn safe_string_field(payload: &Value, field: &str) -> Result<(), String> {
  match payload.get(field) {
    None => Err(format!("Missing field '{}'", field)),
    Some(val) => match val.as_str() {
      Some(s) if sanitize_input(s) => Ok(()),
      _ => Err(format!("Invalid or unsafe value for field '{}'", field)),
    },
  }
}

fn validate_payload(task_type: &str, payload: &Value) -> Result<(), String> {
  let (strings, needs_resize): (&[&str], bool) = match task_type {
    "email" => (&["from", "to", "subject", "content"], false),
    "image" => (&["img_src"], true),
    "video" => (&["vid_src"], true),
    _ => return Err("Unsupported task type".into()),
  };
  for field in strings {
    safe_string_field(payload, field)?;
  }
  if needs_resize && payload.get("resize_factor").is_none() {
    return Err("Missing field 'resize_factor'".into());
  }
  Ok(())
}

pub fn submit_route(
  repository: Arc<dyn TaskRepository>,
  publisher: Arc<dyn MessagePublisher>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("submit")
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::json())
    .and(with_repository(repository))
    .and(with_publisher(publisher))
    .and_then(handle_submit_task)
}

pub fn get_task_route(
  repository: Arc<dyn TaskRepository>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("tasks" / String)
    .and(warp::get())
    .and(with_repository(repository))
    .and_then(handle_get_task)
}

pub(crate) fn with_repository(
  repository: Arc<dyn TaskRepository>,
) -> impl Filter<Extract = (Arc<dyn TaskRepository>,), Error = Infallible> + Clone {
  warp::any().map(move || repository.clone())
}

fn with_publisher(
  publisher: Arc<dyn MessagePublisher>,
) -> impl Filter<Extract = (Arc<dyn MessagePublisher>,), Error = Infallible> + Clone {
  warp::any().map(move || publisher.clone())
}

async fn handle_submit_task(
  request: CreateTaskRequest,
  repository: Arc<dyn TaskRepository>,
  publisher: Arc<dyn MessagePublisher>,
) -> Result<impl warp::Reply, warp::Rejection> {
  if let Err(e) = validate_payload(&request.task_type, &request.payload) {
    error!("Payload validation failed: {}", e);
    return Err(warp::reject::custom(ApiError::BadRequest(e)));
  }
  let task = request
    .into_task()
    .map_err(|e| warp::reject::custom(ApiError::BadRequest(e.to_string())))?;

  repository.save(&task).await.map_err(|e| {
    error!("DB insertion failed: {:?}", e);
    warp::reject::custom(ApiError::Internal("Failed to store task".into()))
  })?;

  let message = encode_task(&task).map_err(|e| {
    error!("Serialization failed: {:?}", e);
    warp::reject::custom(ApiError::Internal("Serialization failed".into()))
  })?;

  publisher.publish(TASK_QUEUE, &message).await.map_err(|e| {
    error!("Failed to publish task {}: {:?}", task.id, e);
    warp::reject::custom(ApiError::Internal("An error occurred when publishing task".into()))
  })?;

  info!(task_id = %task.id, "Task submitted successfully");
  let response = TaskResponse {
    sse_url: format!("/sse?task_id={}", task.id),
    task_id: task.id,
    status: "submitted".into(),
  };
  Ok(warp::reply::json(&response))
}

async fn handle_get_task(
  task_id: String,
  repository: Arc<dyn TaskRepository>,
) -> Result<impl warp::Reply, warp::Rejection> {
  match repository.get_by_id(&task_id).await {
    Ok(Some(task)) => Ok(warp::reply::json(&task)),
    Ok(None) => Err(warp::reject::custom(ApiError::NotFound(format!(
      "task not found: {}",
      task_id
    )))),
    Err(e) => {
      error!("Failed to load task {}: {:?}", task_id, e);
      Err(warp::reject::custom(ApiError::Internal("Failed to load task".into())))
    }
  }
}
