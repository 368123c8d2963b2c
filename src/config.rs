use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::collaborators::{MessagePublisher, TaskExecutor, TaskRepository};
use crate::worker_config::{
  WorkerConfig, DEFAULT_BUFFER_SIZE, DEFAULT_PROCESS_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
  DEFAULT_WORKER_COUNT,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
  pub database_url: String,
  pub rabbitmq_url: String,
  pub server_port: u16,
  pub stats_port: u16,
  pub db_max_connections: u32,
  pub worker_count: usize,
  pub buffer_size: usize,
  pub shutdown_timeout: Duration,
  pub process_timeout: Duration,
  pub step_delay: Duration,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  /// Builds the config from any key/value source. Required keys must be
  /// present; malformed optional numbers fall back to defaults.
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{} must be set", key));

    Ok(Self {
      database_url: required("DATABASE_URL")?,
      rabbitmq_url: required("RABBITMQ_URL")?,
      server_port: parse_or(&lookup, "SERVER_PORT", 8080),
      stats_port: parse_or(&lookup, "STATS_PORT", 9090),
      db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5),
      worker_count: parse_or(&lookup, "WORKER_COUNT", DEFAULT_WORKER_COUNT),
      buffer_size: parse_or(&lookup, "BUFFER_SIZE", DEFAULT_BUFFER_SIZE),
      shutdown_timeout: Duration::from_secs(parse_or(
        &lookup,
        "SHUTDOWN_TIMEOUT_SECS",
        DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
      )),
      process_timeout: Duration::from_secs(parse_or(
        &lookup,
        "PROCESS_TIMEOUT_SECS",
        DEFAULT_PROCESS_TIMEOUT.as_secs(),
      )),
      step_delay: Duration::from_millis(parse_or(&lookup, "STEP_DELAY_MS", 3000)),
    })
  }

  /// Pool settings from this config around the given collaborators.
  pub fn worker_config(
    &self,
    repository: Arc<dyn TaskRepository>,
    executor: Arc<dyn TaskExecutor>,
    publisher: Arc<dyn MessagePublisher>,
  ) -> WorkerConfig {
    WorkerConfig::new(repository, executor, publisher)
      .with_worker_count(self.worker_count)
      .with_buffer_size(self.buffer_size)
      .with_shutdown_timeout(self.shutdown_timeout)
      .with_process_timeout(self.process_timeout)
  }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
  F: Fn(&str) -> Option<String>,
  T: FromStr,
{
  match lookup(key) {
    None => default,
    Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
      warn!("Ignoring malformed {}={:?}, using default", key, raw);
      default
    }),
  }
}

/// Loads [`Config`] from the environment on first use and hands out the same
/// value afterwards. Concurrent first callers wait for a single load.
#[derive(Debug, Default)]
pub struct ConfigLoader {
  config: OnceCell<Config>,
}

impl ConfigLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn load(&self) -> Result<&Config> {
    self.load_with(|| async { Config::from_env() }).await
  }

  /// A failed load is not cached; the next call tries again.
  pub async fn load_with<F, Fut>(&self, load: F) -> Result<&Config>
  where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<Config>>,
  {
    self
      .config
      .get_or_try_init(|| async move {
        let config = load().await?;
        info!(
          "Configuration loaded: workers={} buffer={}",
          config.worker_count, config.buffer_size
        );
        Ok(config)
      })
      .await
  }

  pub fn get(&self) -> Option<&Config> {
    self.config.get()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
      pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| map.get(key).cloned()
  }

  #[test]
  fn test_defaults() {
    let config = Config::from_lookup(lookup(&[
      ("DATABASE_URL", "postgres://localhost/tasks"),
      ("RABBITMQ_URL", "amqp://localhost"),
    ]))
    .unwrap();
    assert_eq!(config.server_port, 8080);
    assert_eq!(config.stats_port, 9090);
    assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
    assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
    assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
    assert_eq!(config.process_timeout, DEFAULT_PROCESS_TIMEOUT);
  }

  #[test]
  fn test_overrides_and_malformed_values() {
    let config = Config::from_lookup(lookup(&[
      ("DATABASE_URL", "postgres://localhost/tasks"),
      ("RABBITMQ_URL", "amqp://localhost"),
      ("SERVER_PORT", "3000"),
      ("WORKER_COUNT", "many"),
      ("SHUTDOWN_TIMEOUT_SECS", " 5 "),
      ("STEP_DELAY_MS", "10"),
    ]))
    .unwrap();
    assert_eq!(config.server_port, 3000);
    assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
    assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    assert_eq!(config.step_delay, Duration::from_millis(10));
  }

  #[test]
  fn test_missing_required_key() {
    let err = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
    assert_eq!(err.to_string(), "RABBITMQ_URL must be set");
  }

  #[tokio::test]
  async fn test_loader_runs_once() {
    let loader = ConfigLoader::new();
    let calls = AtomicUsize::new(0);
    let source = lookup(&[("DATABASE_URL", "postgres://x"), ("RABBITMQ_URL", "amqp://y")]);

    for _ in 0..3 {
      let config = loader
        .load_with(|| async {
          calls.fetch_add(1, Ordering::SeqCst);
          Config::from_lookup(&source)
        })
        .await
        .unwrap();
      assert_eq!(config.rabbitmq_url, "amqp://y");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(loader.get().is_some());
  }

  #[tokio::test]
  async fn test_loader_retries_after_failure() {
    let loader = ConfigLoader::new();
    let failed = loader.load_with(|| async { Err(anyhow!("boom")) }).await;
    assert!(failed.is_err());
    assert!(loader.get().is_none());

    let source = lookup(&[("DATABASE_URL", "postgres://x"), ("RABBITMQ_URL", "amqp://y")]);
    assert!(loader.load_with(|| async { Config::from_lookup(&source) }).await.is_ok());
  }
}
