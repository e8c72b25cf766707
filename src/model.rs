//! Stored record types and the composite key that namespaces them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// File synthesized for every project on its first save.
pub const APPLICATION_PROPERTIES: &str = "application.properties";

const KEY_SEPARATOR: &str = "::";

/// Composite `(group, id)` identifier for an entry in a logical cache.
///
/// Single-entity caches use `group == id == project id`. The files cache uses
/// the project id as group and the file name as id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupedKey {
  pub group: String,
  pub id: String,
}

impl GroupedKey {
  pub fn new(group: impl Into<String>, id: impl Into<String>) -> Self {
    Self {
      group: group.into(),
      id: id.into(),
    }
  }

  /// Key for caches holding one entry per project.
  pub fn project(project_id: &str) -> Self {
    Self::new(project_id, project_id)
  }
}

impl fmt::Display for GroupedKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}{}", self.group, KEY_SEPARATOR, self.id)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  #[serde(rename = "projectId")]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  /// Overwritten on every save with the deployment-wide runtime.
  #[serde(default)]
  pub runtime: String,
}

impl Project {
  pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      description: description.into(),
      runtime: String::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
  pub name: String,
  pub code: String,
  pub project_id: String,
}

impl ProjectFile {
  pub fn new(name: impl Into<String>, code: impl Into<String>, project_id: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      code: code.into(),
      project_id: project_id.into(),
    }
  }

  pub fn key(&self) -> GroupedKey {
    GroupedKey::new(&self.project_id, &self.name)
  }
}

/// Deployment state of a project in one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentState {
  Up,
  Down,
  /// Not deployed or not observable
  Na,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
  pub environment: String,
  pub status: DeploymentState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub container_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
  pub project_id: String,
  #[serde(default)]
  pub statuses: Vec<EnvironmentStatus>,
  /// Epoch milliseconds of the last observation
  #[serde(default)]
  pub last_update: i64,
}

impl ProjectStatus {
  pub fn new(project_id: impl Into<String>, statuses: Vec<EnvironmentStatus>) -> Self {
    Self {
      project_id: project_id.into(),
      statuses,
      last_update: chrono::Utc::now().timestamp_millis(),
    }
  }
}
