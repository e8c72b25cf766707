//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};

use crate::model::{GroupedKey, Project, ProjectFile, ProjectStatus};

/// One of the three independently keyed collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalCache {
  Projects,
  Files,
  Statuses,
}

impl LogicalCache {
  pub const ALL: [LogicalCache; 3] = [Self::Projects, Self::Files, Self::Statuses];

  /// Cache name on disk and on the cluster.
  pub fn name(self) -> &'static str {
    match self {
      Self::Projects => "projects",
      Self::Files => "files",
      Self::Statuses => "statuses",
    }
  }

  /// Protobuf message name of the records this cache holds.
  pub fn message(self) -> &'static str {
    match self {
      Self::Projects => "Project",
      Self::Files => "ProjectFile",
      Self::Statuses => "ProjectStatus",
    }
  }
}

/// Trait for records that can be stored in a logical cache.
///
/// Implementors name the cache they live in, derive their own key, and expose
/// the project id field that backends index for projected queries.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Logical cache holding this record type
  fn cache() -> LogicalCache;

  /// Key under which this record is stored
  fn cache_key(&self) -> GroupedKey;

  /// Value of the indexed `projectId` field
  fn project_id(&self) -> &str;
}

impl Cacheable for Project {
  fn cache() -> LogicalCache {
    LogicalCache::Projects
  }

  fn cache_key(&self) -> GroupedKey {
    GroupedKey::project(&self.id)
  }

  fn project_id(&self) -> &str {
    &self.id
  }
}

impl Cacheable for ProjectFile {
  fn cache() -> LogicalCache {
    LogicalCache::Files
  }

  fn cache_key(&self) -> GroupedKey {
    self.key()
  }

  fn project_id(&self) -> &str {
    &self.project_id
  }
}

impl Cacheable for ProjectStatus {
  fn cache() -> LogicalCache {
    LogicalCache::Statuses
  }

  fn cache_key(&self) -> GroupedKey {
    GroupedKey::project(&self.project_id)
  }

  fn project_id(&self) -> &str {
    &self.project_id
  }
}
