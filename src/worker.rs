use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use taskqueue::config::ConfigLoader;
use taskqueue::database::setup_database;
use taskqueue::encoding::{decode_task, RESULT_TOPIC, TASK_QUEUE};
use taskqueue::messaging::{create_rabbit_channel, declare_queue, RabbitPublisher};
use taskqueue::routes::stats_routes;
use taskqueue::storage::PgTaskRepository;
use taskqueue::worker_processing::SimulatedExecutor;
use taskqueue::{WorkerError, WorkerPool};

const REQUEUE_BACKOFF: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let loader = ConfigLoader::new();
  let config = loader.load().await?;

  let db_pool = setup_database(&config.database_url, config.db_max_connections).await?;
  let rabbit_channel = create_rabbit_channel(&config.rabbitmq_url).await?;
  declare_queue(&rabbit_channel, TASK_QUEUE).await?;
  let publisher = RabbitPublisher::new(rabbit_channel.clone(), &[RESULT_TOPIC]).await?;

  let pool_config = config
    .worker_config(
      Arc::new(PgTaskRepository::new(db_pool)),
      Arc::new(SimulatedExecutor::new(config.step_delay)),
      Arc::new(publisher),
    )
    .with_name("taskqueue-worker");
  let pool = Arc::new(WorkerPool::new(pool_config)?);

  let cancel = CancellationToken::new();
  pool.start(&cancel)?;

  let stats_shutdown = cancel.clone();
  let (stats_addr, stats_server) = warp::serve(stats_routes(pool.clone()))
    .bind_with_graceful_shutdown(([0, 0, 0, 0], config.stats_port), async move {
      stats_shutdown.cancelled().await
    });
  info!("Stats listening on {}", stats_addr);
  let stats_handle = tokio::spawn(stats_server);

  let prefetch = u16::try_from(config.buffer_size).unwrap_or(u16::MAX);
  tokio::select! {
    consumed = consume_tasks(&rabbit_channel, &pool, &cancel, prefetch) => {
      if let Err(e) = consumed {
        error!("Consumer stopped: {:?}", e);
      }
    }
    _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
  }

  // Intake is closed; in-flight tasks drain on the pool token.
  let shutdown = CancellationToken::new();
  let outcome = pool.shutdown(&shutdown).await;
  cancel.cancel();
  if let Err(e) = stats_handle.await {
    error!("Stats server ended abnormally: {:?}", e);
  }

  let stats = pool.stats();
  info!(
    submitted = stats.submitted,
    processed = stats.processed,
    failed = stats.failed,
    "Worker stopped"
  );
  outcome.map_err(Into::into)
}

/// Feeds deliveries into the pool. A delivery is acked once the pool has
/// admitted it; a full queue sends it back to the broker.
async fn consume_tasks(
  channel: &Channel,
  pool: &WorkerPool,
  cancel: &CancellationToken,
  prefetch: u16,
) -> Result<()> {
  channel.basic_qos(prefetch, BasicQosOptions::default()).await?;
  let mut consumer = channel
    .basic_consume(TASK_QUEUE, "taskqueue-worker", BasicConsumeOptions::default(), FieldTable::default())
    .await?;
  info!("Consuming from {}", TASK_QUEUE);

  while let Some(delivery) = consumer.next().await {
    let delivery = match delivery {
      Ok(delivery) => delivery,
      Err(e) => {
        error!("Consumer error: {:?}", e);
        continue;
      }
    };

    let task = match decode_task(&delivery.data) {
      Ok(task) => task,
      Err(e) => {
        error!("Failed to parse task: {:?}", e);
        delivery.ack(BasicAckOptions::default()).await?;
        continue;
      }
    };

    let task_id = task.id.clone();
    match pool.submit_task(cancel, task) {
      Ok(()) => {
        delivery.ack(BasicAckOptions::default()).await?;
      }
      Err(WorkerError::QueueFull) => {
        warn!(task_id = %task_id, "Pool queue full, requeueing");
        delivery
          .nack(BasicNackOptions { requeue: true, ..Default::default() })
          .await?;
        tokio::time::sleep(REQUEUE_BACKOFF).await;
      }
      Err(e) => {
        delivery
          .nack(BasicNackOptions { requeue: true, ..Default::default() })
          .await?;
        return Err(e.into());
      }
    }
  }
  Ok(())
}
