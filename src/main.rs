use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use taskqueue::config::Config;
use taskqueue::database::setup_database;
use taskqueue::encoding::TASK_QUEUE;
use taskqueue::messaging::{create_rabbit_channel, RabbitPublisher};
use taskqueue::routes::routes;
use taskqueue::storage::PgTaskRepository;

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = Config::from_env()?;
  let db_pool = setup_database(&config.database_url, config.db_max_connections).await?;
  let rabbit_channel = create_rabbit_channel(&config.rabbitmq_url).await?;
  let publisher = RabbitPublisher::new(rabbit_channel, &[TASK_QUEUE]).await?;

  let api = routes(Arc::new(PgTaskRepository::new(db_pool)), Arc::new(publisher));

  let (addr, server) = warp::serve(api).bind_with_graceful_shutdown(
    ([0, 0, 0, 0], config.server_port),
    async {
      let _ = tokio::signal::ctrl_c().await;
      info!("Shutdown signal received");
    },
  );
  info!("API listening on {}", addr);
  server.await;
  Ok(())
}
