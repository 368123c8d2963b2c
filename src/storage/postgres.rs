use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::collaborators::TaskRepository;
use crate::error::WorkerError;
use crate::models::{Task, TaskFlags, TaskStatus};

const TASK_COLUMNS: &str =
  "id, task_type, payload, status, retries, max_retries, flags, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgTaskRepository {
  pool: PgPool,
}

impl PgTaskRepository {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  /// Task counts per status, every status present.
  pub async fn count_by_status(&self) -> Result<BTreeMap<TaskStatus, i64>> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM tasks GROUP BY status")
      .fetch_all(&self.pool)
      .await?;

    let mut counts: BTreeMap<TaskStatus, i64> = TaskStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    for row in rows {
      let status: String = row.try_get("status")?;
      let total: i64 = row.try_get("total")?;
      counts.insert(status.parse()?, total);
    }
    Ok(counts)
  }

  /// Most recently finished tasks, newest first.
  pub async fn list_finished(&self, limit: i64) -> Result<Vec<Task>> {
    let query = format!(
      "SELECT {} FROM tasks WHERE status IN ('completed', 'failed') ORDER BY updated_at DESC LIMIT $1",
      TASK_COLUMNS
    );
    let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;
    rows.iter().map(task_from_row).collect()
  }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
  async fn save(&self, task: &Task) -> Result<()> {
    sqlx::query(
      "INSERT INTO tasks (id, task_type, payload, status, retries, max_retries, flags, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
       ON CONFLICT (id) DO UPDATE SET
         task_type = EXCLUDED.task_type,
         payload = EXCLUDED.payload,
         status = EXCLUDED.status,
         retries = EXCLUDED.retries,
         max_retries = EXCLUDED.max_retries,
         flags = EXCLUDED.flags,
         updated_at = EXCLUDED.updated_at",
    )
    .bind(&task.id)
    .bind(&task.task_type)
    .bind(serde_json::Value::Object(task.payload.clone()))
    .bind(task.status.as_str())
    .bind(i32::try_from(task.retries)?)
    .bind(i32::try_from(task.max_retries)?)
    .bind(i16::from(task.flags.bits()))
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&self.pool)
    .await
    .with_context(|| format!("save task {}", task.id))?;
    Ok(())
  }

  async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
    let query = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
    let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
    row.as_ref().map(task_from_row).transpose()
  }

  async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
    let updated = sqlx::query("UPDATE tasks SET status = $1, updated_at = NOW() WHERE id = $2")
      .bind(status.as_str())
      .bind(id)
      .execute(&self.pool)
      .await
      .with_context(|| format!("update status of task {}", id))?;
    if updated.rows_affected() == 0 {
      return Err(WorkerError::TaskNotFound(id.to_string()).into());
    }
    Ok(())
  }

  async fn list_pending(&self, limit: usize) -> Result<Vec<Task>> {
    let query = format!(
      "SELECT {} FROM tasks WHERE status = 'pending' ORDER BY created_at LIMIT $1",
      TASK_COLUMNS
    );
    let rows = sqlx::query(&query)
      .bind(i64::try_from(limit)?)
      .fetch_all(&self.pool)
      .await?;
    rows.iter().map(task_from_row).collect()
  }
}

fn task_from_row(row: &PgRow) -> Result<Task> {
  let status: String = row.try_get("status")?;
  let payload = match row.try_get::<serde_json::Value, _>("payload")? {
    serde_json::Value::Object(map) => map,
    other => return Err(anyhow!("task payload is not an object: {}", other)),
  };
  let retries: i32 = row.try_get("retries")?;
  let max_retries: i32 = row.try_get("max_retries")?;
  let flags: i16 = row.try_get("flags")?;
  let created_at: DateTime<Utc> = row.try_get("created_at")?;
  let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

  Ok(Task {
    id: row.try_get("id")?,
    task_type: row.try_get("task_type")?,
    payload,
    status: status.parse()?,
    retries: u32::try_from(retries)?,
    max_retries: u32::try_from(max_retries)?,
    flags: TaskFlags::from_bits(u8::try_from(flags)?),
    created_at,
    updated_at,
  })
}
