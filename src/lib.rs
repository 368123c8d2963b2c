pub mod collaborators;
pub mod config;
pub mod database;
pub mod encoding;
pub mod error;
pub mod iterators;
pub mod messaging;
pub mod models;
pub mod registry;
pub mod routes;
pub mod stats;
pub mod storage;
pub mod task_cache;
pub mod worker_config;
pub mod worker_pool;
pub mod worker_processing;

pub use collaborators::{MessagePublisher, TaskExecutor, TaskRepository};
pub use error::WorkerError;
pub use models::{CreateTaskRequest, Task, TaskFlags, TaskResult, TaskStatus};
pub use stats::{StatsSnapshot, WorkerStats};
pub use worker_config::WorkerConfig;
pub use worker_pool::{PoolState, WorkerPool};
