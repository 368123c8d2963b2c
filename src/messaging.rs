use anyhow::Result;
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::info;

use crate::collaborators::MessagePublisher;

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

pub async fn create_rabbit_channel(rabbitmq_url: &str) -> Result<Channel> {
  let conn = Retry::start(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
    Connection::connect(rabbitmq_url, ConnectionProperties::default())
  })
    .await?;
  let channel = conn.create_channel().await?;
  info!("RabbitMQ channel created");
  Ok(channel)
}

pub async fn declare_queue(channel: &Channel, queue: &str) -> Result<u32> {
  let declared = channel
    .queue_declare(queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
    .await?;
  Ok(declared.message_count())
}

/// Messages waiting in `queue`, without creating it.
pub async fn queue_depth(channel: &Channel, queue: &str) -> Result<u32> {
  let declared = channel
    .queue_declare(queue, QueueDeclareOptions { passive: true, ..Default::default() }, FieldTable::default())
    .await?;
  Ok(declared.message_count())
}

pub async fn publish_message(channel: &Channel, queue: &str, payload: &[u8]) -> Result<()> {
  Retry::start(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || async {
    channel.basic_publish("", queue, BasicPublishOptions::default(), payload, BasicProperties::default()).await
  })
    .await?;
  Ok(())
}

/// Publishes to the default exchange with the topic as routing key, so each
/// topic lands in the queue of the same name.
#[derive(Clone)]
pub struct RabbitPublisher {
  channel: Channel,
}

impl RabbitPublisher {
  /// Declares every queue in `topics` up front.
  pub async fn new(channel: Channel, topics: &[&str]) -> Result<Self> {
    for topic in topics {
      declare_queue(&channel, topic).await?;
    }
    Ok(Self { channel })
  }
}

#[async_trait]
impl MessagePublisher for RabbitPublisher {
  async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
    publish_message(&self.channel, topic, payload).await
  }
}
