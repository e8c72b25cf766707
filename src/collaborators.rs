//! Interfaces to the systems around the store, and minimal built-in versions
//! of them so the service runs standalone.

use async_trait::async_trait;
use color_eyre::Result;
use tracing::debug;

use crate::model::Project;

/// Produces the content of a project's default `application.properties`.
pub trait DefaultContentGenerator: Send + Sync {
  fn application_properties(&self, project: &Project) -> String;
}

/// Tells whether the process runs inside a managed cluster.
pub trait EnvironmentDetector: Send + Sync {
  fn in_managed_cluster(&self) -> bool;
}

/// Container runtime that hosts the workloads and the store's own containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
  async fn collect_container_stats(&self) -> Result<()>;

  /// Try once to restart or reconnect the store backend.
  async fn attempt_backend_repair(&self) -> Result<()>;
}

/// Observes deployments and persists a `ProjectStatus` per project.
#[async_trait]
pub trait StatusCollector: Send + Sync {
  async fn collect_and_persist(&self) -> Result<()>;
}

/// Pulls upstream revisions and reconciles them into the store.
#[async_trait]
pub trait RevisionSync: Send + Sync {
  async fn pull_and_reconcile(&self) -> Result<()>;
}

/// Renders a properties file from the project's identity and runtime.
#[derive(Debug, Clone, Default)]
pub struct PropertiesTemplate {
  /// Group id prefix of the generated coordinates
  pub group: String,
}

impl PropertiesTemplate {
  pub fn new(group: impl Into<String>) -> Self {
    Self {
      group: group.into(),
    }
  }
}

impl DefaultContentGenerator for PropertiesTemplate {
  fn application_properties(&self, project: &Project) -> String {
    let group = if self.group.is_empty() {
      "org.example"
    } else {
      &self.group
    };
    format!(
      "camel.jbang.project-id={id}\n\
       camel.jbang.gav={group}:{id}:1\n\
       camel.jbang.runtime={runtime}\n\
       camel.main.name={name}\n\
       camel.main.description={description}\n",
      id = project.id,
      group = group,
      runtime = project.runtime,
      name = project.name,
      description = project.description.replace('\n', " "),
    )
  }
}

/// Detects Kubernetes through the service host the kubelet injects.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubernetesDetector;

impl EnvironmentDetector for KubernetesDetector {
  fn in_managed_cluster(&self) -> bool {
    std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
  }
}

/// Stand-in for collaborators that are not attached to this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

#[async_trait]
impl ContainerRuntime for Detached {
  async fn collect_container_stats(&self) -> Result<()> {
    debug!("No container runtime attached, skipping stats");
    Ok(())
  }

  async fn attempt_backend_repair(&self) -> Result<()> {
    debug!("No container runtime attached, cannot repair backend");
    Ok(())
  }
}

#[async_trait]
impl StatusCollector for Detached {
  async fn collect_and_persist(&self) -> Result<()> {
    debug!("No status collector attached");
    Ok(())
  }
}

#[async_trait]
impl RevisionSync for Detached {
  async fn pull_and_reconcile(&self) -> Result<()> {
    debug!("No revision sync attached");
    Ok(())
  }
}
