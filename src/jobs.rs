//! The four background jobs and their wiring onto the runner.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::CacheStorage;
use crate::collaborators::{ContainerRuntime, EnvironmentDetector, RevisionSync, StatusCollector};
use crate::config::JobsConfig;
use crate::scheduler::JobRunner;
use crate::service::CacheService;

pub const COLLECT_CONTAINER_STATS: &str = "collect_container_stats";
pub const CHECK_BACKEND_HEALTH: &str = "check_backend_health";
pub const COLLECT_STATUSES: &str = "collect_statuses";
pub const SYNC_FROM_UPSTREAM: &str = "sync_from_upstream";

/// External systems the jobs drive.
#[derive(Clone)]
pub struct Collaborators {
  pub containers: Arc<dyn ContainerRuntime>,
  pub environment: Arc<dyn EnvironmentDetector>,
  pub statuses: Arc<dyn StatusCollector>,
  pub revisions: Arc<dyn RevisionSync>,
}

/// Trigger one repair attempt when the backend is not ready.
pub async fn check_backend_health<S: CacheStorage>(
  cache: &CacheService<S>,
  containers: &dyn ContainerRuntime,
) -> Result<()> {
  if cache.is_ready().await {
    return Ok(());
  }
  warn!("Store backend is not ready, attempting repair");
  containers.attempt_backend_repair().await
}

/// Collect deployment statuses, only when running inside a managed cluster.
pub async fn collect_statuses(
  environment: &dyn EnvironmentDetector,
  collector: &dyn StatusCollector,
) -> Result<()> {
  if !environment.in_managed_cluster() {
    debug!("Not in a managed cluster, skipping status collection");
    return Ok(());
  }
  collector.collect_and_persist().await
}

/// Schedule all four jobs on a new runner.
pub fn start<S: CacheStorage + 'static>(
  cache: CacheService<S>,
  collaborators: Collaborators,
  intervals: &JobsConfig,
) -> JobRunner {
  let mut runner = JobRunner::new();

  let containers = Arc::clone(&collaborators.containers);
  runner.schedule(COLLECT_CONTAINER_STATS, intervals.container_stats(), move || {
    let containers = Arc::clone(&containers);
    async move { containers.collect_container_stats().await }
  });

  let containers = Arc::clone(&collaborators.containers);
  runner.schedule(CHECK_BACKEND_HEALTH, intervals.backend_health(), move || {
    let cache = cache.clone();
    let containers = Arc::clone(&containers);
    async move { check_backend_health(&cache, containers.as_ref()).await }
  });

  let environment = Arc::clone(&collaborators.environment);
  let statuses = Arc::clone(&collaborators.statuses);
  runner.schedule(COLLECT_STATUSES, intervals.status(), move || {
    let environment = Arc::clone(&environment);
    let statuses = Arc::clone(&statuses);
    async move { collect_statuses(environment.as_ref(), statuses.as_ref()).await }
  });

  let revisions = Arc::clone(&collaborators.revisions);
  runner.schedule(SYNC_FROM_UPSTREAM, intervals.git_pull(), move || {
    let revisions = Arc::clone(&revisions);
    async move { revisions.pull_and_reconcile().await }
  });

  runner
}
