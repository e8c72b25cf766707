//! Cache storage trait and the backend selected at startup.

use async_trait::async_trait;
use std::collections::HashMap;

use super::clustered::ClusteredStore;
use super::embedded::EmbeddedStore;
use super::traits::Cacheable;
use crate::error::StoreResult;
use crate::model::GroupedKey;

/// Trait for cache storage backends.
///
/// The record type selects the logical cache an operation addresses, so one
/// backend value serves all three caches.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Get a single record by key.
  async fn get<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<Option<T>>;

  /// Whether an entry exists for the key.
  async fn contains<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<bool>;

  /// Store a single record (upsert by key).
  async fn put<T: Cacheable>(&self, key: &GroupedKey, value: &T) -> StoreResult<()>;

  /// Store several records in one batch call.
  async fn put_all<T: Cacheable>(&self, entries: &HashMap<GroupedKey, T>) -> StoreResult<()>;

  /// Remove the entry for the key, if any.
  async fn remove<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<()>;

  /// Every record in the cache, in no particular order.
  async fn values<T: Cacheable>(&self) -> StoreResult<Vec<T>>;

  /// Every record whose `projectId` field equals `project_id`.
  async fn find_by_project<T: Cacheable>(&self, project_id: &str) -> StoreResult<Vec<T>>;

  /// Whether the backend is currently reachable and healthy.
  async fn is_ready(&self) -> bool;
}

/// Storage chosen once at startup and never switched afterwards.
pub enum Backend {
  Embedded(EmbeddedStore),
  Clustered(ClusteredStore),
}

impl Backend {
  pub fn mode(&self) -> &'static str {
    match self {
      Self::Embedded(_) => "embedded",
      Self::Clustered(_) => "clustered",
    }
  }
}

#[async_trait]
impl CacheStorage for Backend {
  async fn get<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<Option<T>> {
    match self {
      Self::Embedded(s) => s.get(key).await,
      Self::Clustered(s) => s.get(key).await,
    }
  }

  async fn contains<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<bool> {
    match self {
      Self::Embedded(s) => s.contains::<T>(key).await,
      Self::Clustered(s) => s.contains::<T>(key).await,
    }
  }

  async fn put<T: Cacheable>(&self, key: &GroupedKey, value: &T) -> StoreResult<()> {
    match self {
      Self::Embedded(s) => s.put(key, value).await,
      Self::Clustered(s) => s.put(key, value).await,
    }
  }

  async fn put_all<T: Cacheable>(&self, entries: &HashMap<GroupedKey, T>) -> StoreResult<()> {
    match self {
      Self::Embedded(s) => s.put_all(entries).await,
      Self::Clustered(s) => s.put_all(entries).await,
    }
  }

  async fn remove<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<()> {
    match self {
      Self::Embedded(s) => s.remove::<T>(key).await,
      Self::Clustered(s) => s.remove::<T>(key).await,
    }
  }

  async fn values<T: Cacheable>(&self) -> StoreResult<Vec<T>> {
    match self {
      Self::Embedded(s) => s.values().await,
      Self::Clustered(s) => s.values().await,
    }
  }

  async fn find_by_project<T: Cacheable>(&self, project_id: &str) -> StoreResult<Vec<T>> {
    match self {
      Self::Embedded(s) => s.find_by_project(project_id).await,
      Self::Clustered(s) => s.find_by_project(project_id).await,
    }
  }

  async fn is_ready(&self) -> bool {
    match self {
      Self::Embedded(s) => s.is_ready().await,
      Self::Clustered(s) => s.is_ready().await,
    }
  }
}
