//! Uniform facade over the three logical caches.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{Backend, CacheStorage};
use crate::collaborators::DefaultContentGenerator;
use crate::error::{StoreError, StoreResult};
use crate::model::{GroupedKey, Project, ProjectFile, ProjectStatus, APPLICATION_PROPERTIES};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The single entry point for reading and writing projects, files and
/// statuses, whichever backend was selected at startup.
///
/// The facade adds no locking of its own. Two consequences follow:
/// - Concurrent first saves of one project may both write the default
///   properties file. The writes are identical, so the overwrite is benign.
/// - A `delete_project` racing a `save_project` for the same id can leave the
///   project deleted with its default file freshly written, or recreated right
///   after the delete.
pub struct CacheService<S: CacheStorage = Backend> {
  storage: Arc<S>,
  generator: Arc<dyn DefaultContentGenerator>,
  runtime: Arc<str>,
  /// Bound applied to every backend call
  timeout: Duration,
}

impl<S: CacheStorage> CacheService<S> {
  pub fn new(
    storage: S,
    generator: Arc<dyn DefaultContentGenerator>,
    runtime: impl Into<String>,
  ) -> Self {
    Self {
      storage: Arc::new(storage),
      generator,
      runtime: Arc::from(runtime.into()),
      timeout: DEFAULT_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  async fn bounded<R>(&self, call: impl Future<Output = StoreResult<R>>) -> StoreResult<R> {
    tokio::time::timeout(self.timeout, call)
      .await
      .map_err(|_| StoreError::Timeout(self.timeout))?
  }

  pub async fn list_projects(&self) -> StoreResult<Vec<Project>> {
    self.bounded(self.storage.values()).await
  }

  /// Upsert a project, stamping the configured runtime onto it.
  ///
  /// The first save of a project also stores its default
  /// `application.properties`, before the project itself. Later saves leave
  /// that file alone.
  pub async fn save_project(&self, mut project: Project) -> StoreResult<()> {
    let key = GroupedKey::project(&project.id);
    let is_new = !self.bounded(self.storage.contains::<Project>(&key)).await?;

    project.runtime = self.runtime.to_string();

    // A stored project always has its default file.
    if is_new {
      let code = self.generator.application_properties(&project);
      let file = ProjectFile::new(APPLICATION_PROPERTIES, code, &project.id);
      self.bounded(self.storage.put(&file.key(), &file)).await?;
    }
    self.bounded(self.storage.put(&key, &project)).await?;

    if is_new {
      info!(project = %project.id, "Created project");
    } else {
      debug!(project = %project.id, "Updated project");
    }
    Ok(())
  }

  pub async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
    self
      .bounded(self.storage.get(&GroupedKey::project(project_id)))
      .await
  }

  /// Remove the project entry. Its files and status are kept.
  pub async fn delete_project(&self, project_id: &str) -> StoreResult<()> {
    self
      .bounded(self.storage.remove::<Project>(&GroupedKey::project(project_id)))
      .await
  }

  pub async fn list_project_files(&self, project_id: &str) -> StoreResult<Vec<ProjectFile>> {
    self
      .bounded(self.storage.find_by_project(project_id))
      .await
  }

  pub async fn get_project_file(
    &self,
    project_id: &str,
    name: &str,
  ) -> StoreResult<Option<ProjectFile>> {
    self
      .bounded(self.storage.get(&GroupedKey::new(project_id, name)))
      .await
  }

  pub async fn save_project_file(&self, file: &ProjectFile) -> StoreResult<()> {
    self.bounded(self.storage.put(&file.key(), file)).await
  }

  /// Upsert many files in one backend batch. Atomicity is whatever the
  /// backend's batch offers.
  pub async fn save_project_files(&self, files: &HashMap<GroupedKey, ProjectFile>) -> StoreResult<()> {
    if files.is_empty() {
      return Ok(());
    }
    self.bounded(self.storage.put_all(files)).await
  }

  pub async fn delete_project_file(&self, project_id: &str, name: &str) -> StoreResult<()> {
    self
      .bounded(self.storage.remove::<ProjectFile>(&GroupedKey::new(project_id, name)))
      .await
  }

  pub async fn get_project_status(&self, project_id: &str) -> StoreResult<Option<ProjectStatus>> {
    self
      .bounded(self.storage.get(&GroupedKey::project(project_id)))
      .await
  }

  pub async fn save_project_status(&self, status: &ProjectStatus) -> StoreResult<()> {
    self
      .bounded(self.storage.put(&GroupedKey::project(&status.project_id), status))
      .await
  }

  /// Whether the backend answers within the timeout.
  pub async fn is_ready(&self) -> bool {
    tokio::time::timeout(self.timeout, self.storage.is_ready())
      .await
      .unwrap_or(false)
  }

  /// Store ten demo projects with a few files each.
  pub async fn seed_demo_projects(&self) -> StoreResult<()> {
    for i in 0..10 {
      let project_id = format!("parcel-demo{}", i);
      self
        .save_project(Project::new(
          &project_id,
          format!("Demo project {}", i),
          "Demo project placeholder for UI testing purposes",
        ))
        .await?;

      let files: HashMap<GroupedKey, ProjectFile> = [
        ("new-parcels.yaml", "flows:"),
        ("parcel-confirmation.yaml", "rest:"),
        ("CustomProcessor.java", DEMO_PROCESSOR),
      ]
      .into_iter()
      .map(|(name, code)| {
        let file = ProjectFile::new(name, code, &project_id);
        (file.key(), file)
      })
      .collect();
      self.save_project_files(&files).await?;
    }
    info!("Seeded demo projects");
    Ok(())
  }
}

impl<S: CacheStorage> Clone for CacheService<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generator: Arc::clone(&self.generator),
      runtime: Arc::clone(&self.runtime),
      timeout: self.timeout,
    }
  }
}

const DEMO_PROCESSOR: &str = r#"import org.apache.camel.BindToRegistry;
import org.apache.camel.Exchange;
import org.apache.camel.Processor;

@BindToRegistry("myBean")
public class CustomProcessor implements Processor {

  public void process(Exchange exchange) throws Exception {
      exchange.getIn().setBody("Hello world");
  }
}"#;
