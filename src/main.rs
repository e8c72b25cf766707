use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use projcache::cache;
use projcache::collaborators::{Detached, KubernetesDetector, PropertiesTemplate};
use projcache::config::Config;
use projcache::jobs::{self, Collaborators};
use projcache::CacheService;

#[derive(Parser, Debug)]
#[command(name = "projcache")]
#[command(about = "Project store with embedded or clustered backend and background jobs")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./projcache.yaml or $XDG_CONFIG_HOME/projcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Root directory of the embedded store
  #[arg(long)]
  data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;

  // Override data directory if specified on command line
  let config = if let Some(data_dir) = args.data_dir {
    Config {
      data_dir: Some(data_dir),
      ..config
    }
  } else {
    config
  };

  let _log_guard = projcache::logging::init(config.log_dir.as_deref())?;

  // Backend selection must finish before anything else touches the store.
  let backend = cache::bootstrap(&config).await?;
  info!(mode = backend.mode(), runtime = %config.runtime, "Store ready");

  let service = CacheService::new(backend, Arc::new(PropertiesTemplate::default()), &config.runtime)
    .with_timeout(config.request_timeout());

  if config.seed_demo_projects {
    service.seed_demo_projects().await?;
  }

  let collaborators = Collaborators {
    containers: Arc::new(Detached),
    environment: Arc::new(KubernetesDetector),
    statuses: Arc::new(Detached),
    revisions: Arc::new(Detached),
  };
  let mut runner = jobs::start(service, collaborators, &config.jobs);

  tokio::signal::ctrl_c().await?;
  info!("Shutting down");
  runner.shutdown();

  Ok(())
}
