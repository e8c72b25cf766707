//! Periodic job runner with skip-on-overlap.
//!
//! Every job gets its own timer task. Each tick runs the job body in a
//! separate task so the timer keeps firing while the body runs; a tick that
//! finds the previous run of the same job still in flight is dropped.

use color_eyre::Result;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct JobStats {
  completed: AtomicU64,
  failed: AtomicU64,
  skipped: AtomicU64,
}

/// Observable state of one scheduled job.
#[derive(Debug, Clone)]
pub struct JobHandle {
  name: &'static str,
  running: Arc<AtomicBool>,
  stats: Arc<JobStats>,
}

impl JobHandle {
  fn new(name: &'static str) -> Self {
    Self {
      name,
      running: Arc::new(AtomicBool::new(false)),
      stats: Arc::new(JobStats::default()),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Runs that returned `Ok`.
  pub fn completed(&self) -> u64 {
    self.stats.completed.load(Ordering::Relaxed)
  }

  /// Runs that returned an error or panicked.
  pub fn failed(&self) -> u64 {
    self.stats.failed.load(Ordering::Relaxed)
  }

  /// Ticks dropped because a run was in flight.
  pub fn skipped(&self) -> u64 {
    self.stats.skipped.load(Ordering::Relaxed)
  }
}

/// Holds a job's running flag; clears it on drop, including during a panic.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
  fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
    if flag.swap(true, Ordering::AcqRel) {
      None
    } else {
      Some(Self(Arc::clone(flag)))
    }
  }
}

impl Drop for RunningGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Owns the timer tasks of all scheduled jobs. Dropping the runner stops the
/// timers; runs already in flight finish on their own.
#[derive(Default)]
pub struct JobRunner {
  jobs: Vec<JobHandle>,
  timers: Vec<JoinHandle<()>>,
}

impl JobRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `job` every `every`, starting immediately.
  pub fn schedule<F, Fut>(&mut self, name: &'static str, every: Duration, job: F) -> JobHandle
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    let handle = JobHandle::new(name);
    let job = Arc::new(job);
    let state = handle.clone();

    let timer = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        ticker.tick().await;

        let Some(guard) = RunningGuard::acquire(&state.running) else {
          state.stats.skipped.fetch_add(1, Ordering::Relaxed);
          debug!(job = name, "Previous run still in progress, dropping tick");
          continue;
        };

        let job = Arc::clone(&job);
        let state = state.clone();
        tokio::spawn(async move {
          let _guard = guard;
          let started = Instant::now();
          let outcome = AssertUnwindSafe(async { job().await }).catch_unwind().await;
          match outcome {
            Ok(Ok(())) => {
              state.stats.completed.fetch_add(1, Ordering::Relaxed);
              debug!(job = name, elapsed_ms = started.elapsed().as_millis() as u64, "Job finished");
            }
            Ok(Err(e)) => {
              state.stats.failed.fetch_add(1, Ordering::Relaxed);
              warn!(job = name, error = %e, "Job failed");
            }
            Err(_) => {
              state.stats.failed.fetch_add(1, Ordering::Relaxed);
              error!(job = name, "Job panicked");
            }
          }
        });
      }
    });

    info!(job = name, interval_ms = every.as_millis() as u64, "Scheduled job");
    self.jobs.push(handle.clone());
    self.timers.push(timer);
    handle
  }

  pub fn jobs(&self) -> &[JobHandle] {
    &self.jobs
  }

  pub fn job(&self, name: &str) -> Option<&JobHandle> {
    self.jobs.iter().find(|j| j.name == name)
  }

  /// Stop all timers.
  pub fn shutdown(&mut self) {
    for timer in self.timers.drain(..) {
      timer.abort();
    }
  }
}

impl Drop for JobRunner {
  fn drop(&mut self) {
    self.shutdown();
  }
}
