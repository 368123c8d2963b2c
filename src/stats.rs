use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Lock-free worker pool counters.
///
/// Every recorder is a single atomic add, so any number of workers can update
/// the same instance without coordination.
#[derive(Debug)]
pub struct WorkerStats {
  submitted: AtomicU64,
  processed: AtomicU64,
  failed: AtomicU64,
  retried: AtomicU64,
  total_process_nanos: AtomicU64,
  active_workers: AtomicI64,
  running: AtomicBool,
}

/// Point-in-time copy of [`WorkerStats`]. Each field is sampled on its own;
/// fields are not mutually consistent under concurrent updates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
  pub submitted: u64,
  pub processed: u64,
  pub failed: u64,
  pub retried: u64,
  pub active_workers: i64,
  pub total_process_nanos: u64,
  pub average_process_nanos: u64,
  pub success_rate: f64,
  pub running: bool,
}

impl Default for WorkerStats {
  fn default() -> Self {
    Self::new()
  }
}

impl WorkerStats {
  pub fn new() -> Self {
    Self {
      submitted: AtomicU64::new(0),
      processed: AtomicU64::new(0),
      failed: AtomicU64::new(0),
      retried: AtomicU64::new(0),
      total_process_nanos: AtomicU64::new(0),
      active_workers: AtomicI64::new(0),
      running: AtomicBool::new(true),
    }
  }

  pub fn record_submission(&self) {
    self.submitted.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_processed(&self, duration: Duration) {
    self.processed.fetch_add(1, Ordering::Relaxed);
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    self.total_process_nanos.fetch_add(nanos, Ordering::Relaxed);
  }

  pub fn record_failed(&self) {
    self.failed.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_retry(&self) {
    self.retried.fetch_add(1, Ordering::Relaxed);
  }

  pub fn increment_active(&self) {
    self.active_workers.fetch_add(1, Ordering::Relaxed);
  }

  pub fn decrement_active(&self) {
    self.active_workers.fetch_sub(1, Ordering::Relaxed);
  }

  pub fn submitted(&self) -> u64 {
    self.submitted.load(Ordering::Relaxed)
  }

  pub fn processed(&self) -> u64 {
    self.processed.load(Ordering::Relaxed)
  }

  pub fn failed(&self) -> u64 {
    self.failed.load(Ordering::Relaxed)
  }

  pub fn retried(&self) -> u64 {
    self.retried.load(Ordering::Relaxed)
  }

  pub fn active(&self) -> i64 {
    self.active_workers.load(Ordering::Relaxed)
  }

  pub fn total_process_time(&self) -> Duration {
    Duration::from_nanos(self.total_process_nanos.load(Ordering::Relaxed))
  }

  /// Zero until something has been processed.
  pub fn average_process_time(&self) -> Duration {
    let processed = self.processed();
    if processed == 0 {
      return Duration::ZERO;
    }
    Duration::from_nanos(self.total_process_nanos.load(Ordering::Relaxed) / processed)
  }

  /// Processed over submitted, as a percentage. Zero until something has been
  /// submitted.
  pub fn success_rate(&self) -> f64 {
    let submitted = self.submitted();
    if submitted == 0 {
      return 0.0;
    }
    self.processed() as f64 / submitted as f64 * 100.0
  }

  /// Zeroes every counter.
  ///
  /// Callers must make sure no worker is recording at the same time; a reset
  /// racing with a recording can lose either side's update.
  pub fn reset(&self) {
    self.submitted.store(0, Ordering::Relaxed);
    self.processed.store(0, Ordering::Relaxed);
    self.failed.store(0, Ordering::Relaxed);
    self.retried.store(0, Ordering::Relaxed);
    self.total_process_nanos.store(0, Ordering::Relaxed);
    self.active_workers.store(0, Ordering::Relaxed);
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  pub fn stop(&self) {
    self.running.store(false, Ordering::Release);
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      submitted: self.submitted(),
      processed: self.processed(),
      failed: self.failed(),
      retried: self.retried(),
      active_workers: self.active(),
      total_process_nanos: self.total_process_nanos.load(Ordering::Relaxed),
      average_process_nanos: u64::try_from(self.average_process_time().as_nanos())
        .unwrap_or(u64::MAX),
      success_rate: self.success_rate(),
      running: self.is_running(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn test_average_process_time() {
    let stats = WorkerStats::new();
    assert_eq!(stats.average_process_time(), Duration::ZERO);

    stats.record_processed(Duration::from_nanos(100));
    stats.record_processed(Duration::from_nanos(201));
    assert_eq!(stats.average_process_time(), Duration::from_nanos(150));
    assert_eq!(stats.total_process_time(), Duration::from_nanos(301));
  }

  #[test]
  fn test_success_rate() {
    let stats = WorkerStats::new();
    assert_eq!(stats.success_rate(), 0.0);

    for _ in 0..10 {
      stats.record_submission();
    }
    for _ in 0..8 {
      stats.record_processed(Duration::from_millis(1));
    }
    assert_eq!(stats.success_rate(), 80.0);
  }

  #[test]
  fn test_active_gauge_is_signed() {
    let stats = WorkerStats::new();
    stats.increment_active();
    stats.decrement_active();
    stats.decrement_active();
    assert_eq!(stats.active(), -1);
  }

  #[test]
  fn test_reset_and_stop() {
    let stats = WorkerStats::new();
    stats.record_submission();
    stats.record_failed();
    stats.record_retry();
    stats.increment_active();
    assert!(stats.is_running());

    stats.reset();
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.submitted, 0);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.retried, 0);
    assert_eq!(snapshot.active_workers, 0);

    stats.stop();
    assert!(!stats.is_running());
    assert!(!stats.snapshot().running);
  }

  #[test]
  fn test_concurrent_recording_is_exact() {
    let stats = Arc::new(WorkerStats::new());
    let threads = 8;
    let per_thread = 1_000;

    let handles: Vec<_> = (0..threads)
      .map(|_| {
        let stats = stats.clone();
        std::thread::spawn(move || {
          for _ in 0..per_thread {
            stats.record_submission();
            stats.record_processed(Duration::from_nanos(1));
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(stats.submitted(), threads * per_thread);
    assert_eq!(stats.processed(), threads * per_thread);
    assert_eq!(stats.total_process_time(), Duration::from_nanos(threads * per_thread));
  }

  #[test]
  fn test_snapshot_derived_fields() {
    let stats = WorkerStats::new();
    stats.record_submission();
    stats.record_submission();
    stats.record_processed(Duration::from_nanos(40));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.average_process_nanos, 40);
    assert_eq!(snapshot.success_rate, 50.0);
  }
}
