//! Embedded single-node backend: one SQLite file per logical cache.
//!
//! Each cache is preloaded fully into memory when the store opens and every
//! mutation is written through to disk before the in-memory image changes.
//! A secondary index from project id to keys answers projected queries.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::storage::CacheStorage;
use super::traits::{Cacheable, LogicalCache};
use crate::error::{StoreError, StoreResult};
use crate::model::GroupedKey;

/// Schema for a single cache file.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    grp TEXT NOT NULL,
    id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (grp, id)
);

CREATE INDEX IF NOT EXISTS idx_entries_project ON entries(project_id);
"#;

#[derive(Debug, Clone)]
struct Entry {
  project_id: String,
  data: Vec<u8>,
}

/// A serialized record ready to be written.
struct Encoded {
  key: GroupedKey,
  project_id: String,
  data: Vec<u8>,
}

impl Encoded {
  fn new<T: Cacheable>(key: &GroupedKey, value: &T) -> StoreResult<Self> {
    Ok(Self {
      key: key.clone(),
      project_id: value.project_id().to_string(),
      data: serde_json::to_vec(value)?,
    })
  }
}

/// In-memory image of one cache file plus its write-through connection.
struct LocalCache {
  conn: Connection,
  entries: HashMap<GroupedKey, Entry>,
  by_project: HashMap<String, BTreeSet<GroupedKey>>,
}

impl LocalCache {
  fn open(path: &Path) -> StoreResult<Self> {
    let conn = Connection::open(path).map_err(|e| {
      StoreError::BackendUnavailable(format!("failed to open {}: {}", path.display(), e))
    })?;
    conn.execute_batch(CACHE_SCHEMA)?;

    let mut cache = Self {
      conn,
      entries: HashMap::new(),
      by_project: HashMap::new(),
    };
    cache.preload()?;
    Ok(cache)
  }

  fn preload(&mut self) -> StoreResult<()> {
    let rows: Vec<(GroupedKey, Entry)> = {
      let mut stmt = self
        .conn
        .prepare("SELECT grp, id, project_id, data FROM entries")?;
      let rows = stmt.query_map([], |row| {
        Ok((
          GroupedKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
          Entry {
            project_id: row.get(2)?,
            data: row.get(3)?,
          },
        ))
      })?;
      let collected = rows.collect::<Result<Vec<_>, _>>()?;
      collected
    };

    for (key, entry) in rows {
      self.index(key, entry);
    }
    Ok(())
  }

  fn index(&mut self, key: GroupedKey, entry: Entry) {
    self
      .by_project
      .entry(entry.project_id.clone())
      .or_default()
      .insert(key.clone());
    if let Some(previous) = self.entries.insert(key.clone(), entry) {
      self.unindex_project(&previous.project_id, &key);
    }
  }

  fn unindex_project(&mut self, project_id: &str, key: &GroupedKey) {
    // An overwrite under the same project keeps its index slot.
    if self
      .entries
      .get(key)
      .is_some_and(|e| e.project_id == project_id)
    {
      return;
    }
    if let Some(keys) = self.by_project.get_mut(project_id) {
      keys.remove(key);
      if keys.is_empty() {
        self.by_project.remove(project_id);
      }
    }
  }

  fn write(conn: &Connection, record: &Encoded) -> StoreResult<()> {
    conn.execute(
      "INSERT OR REPLACE INTO entries (grp, id, project_id, data, updated_at)
       VALUES (?, ?, ?, ?, datetime('now'))",
      params![record.key.group, record.key.id, record.project_id, record.data],
    )?;
    Ok(())
  }

  fn put(&mut self, record: Encoded) -> StoreResult<()> {
    Self::write(&self.conn, &record)?;
    self.index(
      record.key,
      Entry {
        project_id: record.project_id,
        data: record.data,
      },
    );
    Ok(())
  }

  fn put_all(&mut self, records: Vec<Encoded>) -> StoreResult<()> {
    let tx = self.conn.transaction()?;
    for record in &records {
      Self::write(&tx, record)?;
    }
    tx.commit()?;

    for record in records {
      self.index(
        record.key,
        Entry {
          project_id: record.project_id,
          data: record.data,
        },
      );
    }
    Ok(())
  }

  fn remove(&mut self, key: &GroupedKey) -> StoreResult<()> {
    self.conn.execute(
      "DELETE FROM entries WHERE grp = ? AND id = ?",
      params![key.group, key.id],
    )?;
    if let Some(previous) = self.entries.remove(key) {
      self.unindex_project(&previous.project_id, key);
    }
    Ok(())
  }

  fn find_by_project(&self, project_id: &str) -> Vec<Vec<u8>> {
    self
      .by_project
      .get(project_id)
      .into_iter()
      .flatten()
      .filter_map(|key| self.entries.get(key))
      .map(|entry| entry.data.clone())
      .collect()
  }

  fn ping(&self) -> StoreResult<()> {
    self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(())
  }
}

/// Embedded backend rooted at a fixed data directory.
pub struct EmbeddedStore {
  root: PathBuf,
  projects: Arc<Mutex<LocalCache>>,
  files: Arc<Mutex<LocalCache>>,
  statuses: Arc<Mutex<LocalCache>>,
}

impl EmbeddedStore {
  /// Open (or create) the three cache files under `root` and preload them.
  pub fn open(root: &Path) -> StoreResult<Self> {
    std::fs::create_dir_all(root).map_err(|e| {
      StoreError::BackendUnavailable(format!(
        "failed to create data directory {}: {}",
        root.display(),
        e
      ))
    })?;

    let open = |cache: LogicalCache| -> StoreResult<Arc<Mutex<LocalCache>>> {
      let path = root.join(format!("{}.db", cache.name()));
      let local = LocalCache::open(&path)?;
      info!(
        cache = cache.name(),
        entries = local.entries.len(),
        path = %path.display(),
        "Preloaded local cache"
      );
      Ok(Arc::new(Mutex::new(local)))
    };

    Ok(Self {
      root: root.to_path_buf(),
      projects: open(LogicalCache::Projects)?,
      files: open(LogicalCache::Files)?,
      statuses: open(LogicalCache::Statuses)?,
    })
  }

  fn cache(&self, cache: LogicalCache) -> Arc<Mutex<LocalCache>> {
    Arc::clone(match cache {
      LogicalCache::Projects => &self.projects,
      LogicalCache::Files => &self.files,
      LogicalCache::Statuses => &self.statuses,
    })
  }

  /// Run `f` against one cache on the blocking pool.
  async fn with_cache<R, F>(&self, cache: LogicalCache, f: F) -> StoreResult<R>
  where
    R: Send + 'static,
    F: FnOnce(&mut LocalCache) -> StoreResult<R> + Send + 'static,
  {
    let local = self.cache(cache);
    tokio::task::spawn_blocking(move || {
      let mut guard = local
        .lock()
        .map_err(|e| StoreError::BackendUnavailable(format!("lock poisoned: {}", e)))?;
      f(&mut guard)
    })
    .await
    .map_err(|e| StoreError::BackendUnavailable(format!("storage task failed: {}", e)))?
  }
}

fn decode<T: Cacheable>(data: &[u8]) -> StoreResult<T> {
  Ok(serde_json::from_slice(data)?)
}

#[async_trait]
impl CacheStorage for EmbeddedStore {
  async fn get<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<Option<T>> {
    let key = key.clone();
    let data = self
      .with_cache(T::cache(), move |c| {
        Ok(c.entries.get(&key).map(|e| e.data.clone()))
      })
      .await?;
    data.map(|d| decode(&d)).transpose()
  }

  async fn contains<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<bool> {
    let key = key.clone();
    self
      .with_cache(T::cache(), move |c| Ok(c.entries.contains_key(&key)))
      .await
  }

  async fn put<T: Cacheable>(&self, key: &GroupedKey, value: &T) -> StoreResult<()> {
    let record = Encoded::new(key, value)?;
    debug!(cache = T::cache().name(), key = %key, "put");
    self.with_cache(T::cache(), move |c| c.put(record)).await
  }

  async fn put_all<T: Cacheable>(&self, entries: &HashMap<GroupedKey, T>) -> StoreResult<()> {
    let records = entries
      .iter()
      .map(|(key, value)| Encoded::new(key, value))
      .collect::<StoreResult<Vec<_>>>()?;
    debug!(cache = T::cache().name(), count = records.len(), "put_all");
    self.with_cache(T::cache(), move |c| c.put_all(records)).await
  }

  async fn remove<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<()> {
    let key = key.clone();
    self.with_cache(T::cache(), move |c| c.remove(&key)).await
  }

  async fn values<T: Cacheable>(&self) -> StoreResult<Vec<T>> {
    let data = self
      .with_cache(T::cache(), |c| {
        Ok(c.entries.values().map(|e| e.data.clone()).collect::<Vec<_>>())
      })
      .await?;
    data.iter().map(|d| decode(d)).collect()
  }

  async fn find_by_project<T: Cacheable>(&self, project_id: &str) -> StoreResult<Vec<T>> {
    let project_id = project_id.to_string();
    let data = self
      .with_cache(T::cache(), move |c| Ok(c.find_by_project(&project_id)))
      .await?;
    data.iter().map(|d| decode(d)).collect()
  }

  async fn is_ready(&self) -> bool {
    if !self.root.is_dir() {
      return false;
    }
    for cache in LogicalCache::ALL {
      if self.with_cache(cache, |c| c.ping()).await.is_err() {
        return false;
      }
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Project, ProjectFile};

  fn file(project: &str, name: &str, code: &str) -> ProjectFile {
    ProjectFile::new(name, code, project)
  }

  #[tokio::test]
  async fn test_put_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = EmbeddedStore::open(dir.path()).unwrap();
    let f = file("p1", "x.yaml", "flows:");

    store.put(&f.key(), &f).await.unwrap();

    let loaded: Option<ProjectFile> = store.get(&f.key()).await.unwrap();
    assert_eq!(loaded, Some(f.clone()));
    assert!(store.contains::<ProjectFile>(&f.key()).await.unwrap());
  }

  #[tokio::test]
  async fn test_caches_are_separate() {
    let dir = tempfile::tempdir().unwrap();
    let store = EmbeddedStore::open(dir.path()).unwrap();
    let key = GroupedKey::project("p1");

    store.put(&key, &Project::new("p1", "Demo", "")).await.unwrap();

    assert!(store.contains::<Project>(&key).await.unwrap());
    assert!(!store.contains::<ProjectFile>(&key).await.unwrap());
  }

  #[tokio::test]
  async fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
      let store = EmbeddedStore::open(dir.path()).unwrap();
      let f = file("p1", "x.yaml", "flows:");
      store.put(&f.key(), &f).await.unwrap();
      let gone = file("p1", "gone.yaml", "rest:");
      store.put(&gone.key(), &gone).await.unwrap();
      store.remove::<ProjectFile>(&gone.key()).await.unwrap();
    }

    let store = EmbeddedStore::open(dir.path()).unwrap();
    let files: Vec<ProjectFile> = store.find_by_project("p1").await.unwrap();
    assert_eq!(files, vec![file("p1", "x.yaml", "flows:")]);
    assert!(dir.path().join("files.db").exists());
    assert!(dir.path().join("projects.db").exists());
    assert!(dir.path().join("statuses.db").exists());
  }

  #[tokio::test]
  async fn test_index_tracks_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let store = EmbeddedStore::open(dir.path()).unwrap();
    let a = file("p1", "a.yaml", "a");
    let b = file("p1", "b.yaml", "b");
    store.put(&a.key(), &a).await.unwrap();
    store.put(&b.key(), &b).await.unwrap();

    store.remove::<ProjectFile>(&a.key()).await.unwrap();

    let files: Vec<ProjectFile> = store.find_by_project("p1").await.unwrap();
    assert_eq!(files, vec![b]);
  }

  #[tokio::test]
  async fn test_index_moves_when_project_field_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = EmbeddedStore::open(dir.path()).unwrap();
    let key = GroupedKey::new("p1", "odd.yaml");

    store.put(&key, &file("p1", "odd.yaml", "")).await.unwrap();
    store.put(&key, &file("p2", "odd.yaml", "")).await.unwrap();

    let p1: Vec<ProjectFile> = store.find_by_project("p1").await.unwrap();
    let p2: Vec<ProjectFile> = store.find_by_project("p2").await.unwrap();
    assert!(p1.is_empty());
    assert_eq!(p2.len(), 1);
  }

  #[tokio::test]
  async fn test_overwrite_keeps_single_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = EmbeddedStore::open(dir.path()).unwrap();
    let first = file("p1", "x.yaml", "v1");
    let second = file("p1", "x.yaml", "v2");

    store.put(&first.key(), &first).await.unwrap();
    store.put(&second.key(), &second).await.unwrap();

    let files: Vec<ProjectFile> = store.find_by_project("p1").await.unwrap();
    assert_eq!(files, vec![second]);
  }

  #[tokio::test]
  async fn test_put_all_is_one_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = EmbeddedStore::open(dir.path()).unwrap();
    let batch: HashMap<GroupedKey, ProjectFile> = ["a.yaml", "b.yaml", "c.yaml"]
      .into_iter()
      .map(|name| {
        let f = file("p1", name, "");
        (f.key(), f)
      })
      .collect();

    store.put_all(&batch).await.unwrap();

    let files: Vec<ProjectFile> = store.values().await.unwrap();
    assert_eq!(files.len(), 3);
  }

  #[tokio::test]
  async fn test_is_ready() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    let store = EmbeddedStore::open(&root).unwrap();
    assert!(store.is_ready().await);

    std::fs::remove_dir_all(&root).unwrap();
    assert!(!store.is_ready().await);
  }
}
