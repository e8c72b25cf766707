use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::Credentials;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Runtime kind stamped onto every saved project
  pub runtime: String,
  /// Remote cluster connection; when absent the embedded store is used
  pub cluster: Option<ClusterConfig>,
  /// Root of the embedded store (defaults to $XDG_DATA_HOME/projcache)
  pub data_dir: Option<PathBuf>,
  /// Per-call bound on backend operations, in milliseconds
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
  #[serde(default)]
  pub jobs: JobsConfig,
  /// Store demo projects at startup
  #[serde(default)]
  pub seed_demo_projects: bool,
  /// Directory for daily rolling log files; stdout when unset
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
  pub url: String,
  pub username: Option<String>,
}

/// Job intervals in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
  #[serde(default = "default_container_stats_secs")]
  pub container_stats_secs: u64,
  #[serde(default = "default_backend_health_secs")]
  pub backend_health_secs: u64,
  #[serde(default = "default_status_secs")]
  pub status_secs: u64,
  #[serde(default = "default_git_pull_secs")]
  pub git_pull_secs: u64,
}

impl Default for JobsConfig {
  fn default() -> Self {
    Self {
      container_stats_secs: default_container_stats_secs(),
      backend_health_secs: default_backend_health_secs(),
      status_secs: default_status_secs(),
      git_pull_secs: default_git_pull_secs(),
    }
  }
}

fn default_request_timeout_ms() -> u64 {
  5_000
}

fn default_container_stats_secs() -> u64 {
  10
}

fn default_backend_health_secs() -> u64 {
  5
}

fn default_status_secs() -> u64 {
  2
}

fn default_git_pull_secs() -> u64 {
  10
}

impl JobsConfig {
  pub fn container_stats(&self) -> Duration {
    secs(self.container_stats_secs)
  }

  pub fn backend_health(&self) -> Duration {
    secs(self.backend_health_secs)
  }

  pub fn status(&self) -> Duration {
    secs(self.status_secs)
  }

  pub fn git_pull(&self) -> Duration {
    secs(self.git_pull_secs)
  }
}

/// Zero would make `tokio::time::interval` panic.
fn secs(value: u64) -> Duration {
  Duration::from_secs(value.max(1))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./projcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/projcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/projcache/config.yaml\n\
                 At minimum it must set `runtime`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("projcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("projcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.runtime.trim().is_empty() {
      return Err(eyre!("`runtime` must not be empty"));
    }
    Ok(config)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms.max(1))
  }

  /// Resolve the embedded store root.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("projcache"))
  }

  /// Cluster credentials, when a username is configured.
  ///
  /// The password comes from PROJCACHE_CLUSTER_PASSWORD.
  pub fn cluster_credentials(&self) -> Result<Option<Credentials>> {
    let Some(username) = self.cluster.as_ref().and_then(|c| c.username.clone()) else {
      return Ok(None);
    };
    let password = std::env::var("PROJCACHE_CLUSTER_PASSWORD").map_err(|_| {
      eyre!("Cluster password not found. Set PROJCACHE_CLUSTER_PASSWORD environment variable.")
    })?;
    Ok(Some(Credentials { username, password }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("runtime: quarkus\n").unwrap();
    assert_eq!(config.runtime, "quarkus");
    assert!(config.cluster.is_none());
    assert_eq!(config.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.jobs.backend_health(), Duration::from_secs(5));
    assert!(!config.seed_demo_projects);
  }

  #[test]
  fn test_cluster_and_intervals() {
    let config = Config::parse(
      "runtime: spring-boot\n\
       cluster:\n  url: http://infinispan:11222\n\
       jobs:\n  status_secs: 30\n  git_pull_secs: 0\n",
    )
    .unwrap();
    assert_eq!(config.cluster.unwrap().url, "http://infinispan:11222");
    assert_eq!(config.jobs.status(), Duration::from_secs(30));
    assert_eq!(config.jobs.git_pull(), Duration::from_secs(1));
    assert_eq!(config.jobs.container_stats(), Duration::from_secs(10));
  }

  #[test]
  fn test_runtime_is_required() {
    assert!(Config::parse("cluster: null\n").is_err());
    assert!(Config::parse("runtime: ' '\n").is_err());
  }

  #[test]
  fn test_explicit_data_dir_wins() {
    let config = Config::parse("runtime: quarkus\ndata_dir: /tmp/store\n").unwrap();
    assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/store"));
  }

  #[test]
  fn test_no_credentials_without_username() {
    let config = Config::parse("runtime: quarkus\ncluster:\n  url: http://c:11222\n").unwrap();
    assert!(config.cluster_credentials().unwrap().is_none());
  }
}
