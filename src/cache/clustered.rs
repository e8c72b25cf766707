//! Clustered backend speaking the Infinispan REST v2 API.
//!
//! Records travel as JSON and are transcoded by the cluster into protostream
//! using the schema registered at connect time. Projected queries run as Ickle
//! queries over the cache search endpoint.

use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{Cacheable, LogicalCache};
use crate::error::{StoreError, StoreResult};
use crate::model::GroupedKey;

/// Protobuf package of every stored message.
pub const SCHEMA_PACKAGE: &str = "projcache";

const SCHEMA_NAME: &str = "projcache.proto";

const SCHEMA: &str = r#"package projcache;

/* @Indexed */
message Project {
    /* @Basic */
    optional string projectId = 1;
    optional string name = 2;
    optional string description = 3;
    optional string runtime = 4;
}

/* @Indexed */
message ProjectFile {
    optional string name = 1;
    optional string code = 2;
    /* @Basic */
    optional string projectId = 3;
}

message EnvironmentStatus {
    optional string environment = 1;
    optional string status = 2;
    optional string containerName = 3;
}

/* @Indexed */
message ProjectStatus {
    /* @Basic */
    optional string projectId = 1;
    repeated EnvironmentStatus statuses = 2;
    optional int64 lastUpdate = 3;
}
"#;

/// Hits requested per search page.
const PAGE_SIZE: usize = 10_000;

/// Credentials for the cluster's REST endpoint.
#[derive(Debug, Clone)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
  #[serde(default)]
  hits: Vec<SearchHit>,
  #[serde(default)]
  hit_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
  hit: Value,
}

/// Remote backend reached over HTTP.
pub struct ClusteredStore {
  client: reqwest::Client,
  base: Url,
  credentials: Option<Credentials>,
  page_size: usize,
}

impl ClusteredStore {
  /// Connect to the cluster, register the record schema and create the three
  /// caches if they do not exist yet.
  pub async fn connect(
    url: &str,
    credentials: Option<Credentials>,
    timeout: Duration,
  ) -> StoreResult<Self> {
    let base = Url::parse(url)
      .map_err(|e| StoreError::Startup(format!("invalid cluster url '{}': {}", url, e)))?;
    if base.cannot_be_a_base() {
      return Err(StoreError::Startup(format!(
        "cluster url '{}' cannot carry a path",
        url
      )));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| StoreError::Startup(format!("failed to build http client: {}", e)))?;

    let store = Self {
      client,
      base,
      credentials,
      page_size: PAGE_SIZE,
    };
    store.register_schema().await?;
    for cache in LogicalCache::ALL {
      store.ensure_cache(cache).await?;
    }
    Ok(store)
  }

  /// Hits fetched per search request.
  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  fn url(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn cache_url(&self, cache: LogicalCache) -> Url {
    self.url(&["rest", "v2", "caches", cache.name()])
  }

  fn entry_url(&self, cache: LogicalCache, key: &GroupedKey) -> Url {
    self.url(&["rest", "v2", "caches", cache.name(), &key.to_string()])
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let request = self.client.request(method, url);
    match &self.credentials {
      Some(c) => request.basic_auth(&c.username, Some(&c.password)),
      None => request,
    }
  }

  fn entry_request(&self, method: Method, cache: LogicalCache, key: &GroupedKey) -> RequestBuilder {
    self
      .request(method, self.entry_url(cache, key))
      .header("Key-Content-Type", "text/plain; charset=UTF-8")
  }

  async fn register_schema(&self) -> StoreResult<()> {
    let response = self
      .request(Method::PUT, self.url(&["rest", "v2", "schemas", SCHEMA_NAME]))
      .header(header::CONTENT_TYPE, "text/plain")
      .body(SCHEMA)
      .send()
      .await
      .map_err(|e| StoreError::Startup(format!("failed to register schema: {}", e)))?;
    if !response.status().is_success() {
      return Err(StoreError::Startup(format!(
        "schema registration rejected with {}",
        response.status()
      )));
    }
    Ok(())
  }

  async fn ensure_cache(&self, cache: LogicalCache) -> StoreResult<()> {
    let url = self.cache_url(cache);
    let existing = self
      .request(Method::HEAD, url.clone())
      .send()
      .await
      .map_err(|e| StoreError::Startup(format!("cluster unreachable: {}", e)))?;

    match existing.status() {
      s if s.is_success() => {
        debug!(cache = cache.name(), "Remote cache already exists");
        return Ok(());
      }
      StatusCode::NOT_FOUND => {}
      s => {
        return Err(StoreError::Startup(format!(
          "unexpected status {} probing cache {}",
          s,
          cache.name()
        )))
      }
    }

    let response = self
      .request(Method::POST, url)
      .json(&cache_config(cache))
      .send()
      .await
      .map_err(|e| StoreError::Startup(format!("failed to create cache {}: {}", cache.name(), e)))?;

    // Another node may have created it between the HEAD and the create.
    if response.status().is_success() || response.status() == StatusCode::CONFLICT {
      info!(cache = cache.name(), "Created remote cache");
      Ok(())
    } else {
      Err(StoreError::Startup(format!(
        "creating cache {} failed with {}",
        cache.name(),
        response.status()
      )))
    }
  }

  /// Run `query` to completion, following pages until the cluster's hit
  /// count is reached.
  async fn search<T: Cacheable>(&self, query: &str) -> StoreResult<Vec<T>> {
    let mut records = Vec::new();
    loop {
      let offset = records.len();
      let mut url = self.cache_url(T::cache());
      url
        .query_pairs_mut()
        .append_pair("action", "search")
        .append_pair("query", query)
        .append_pair("offset", &offset.to_string())
        .append_pair("max_results", &self.page_size.to_string());

      let response = self
        .request(Method::GET, url)
        .header(header::ACCEPT, "application/json")
        .send()
        .await?
        .error_for_status()?;
      let page: SearchResponse = response.json().await?;
      let fetched = page.hits.len();

      for hit in page.hits {
        records.push(serde_json::from_value(hit.hit)?);
      }

      let total = match page.hit_count {
        Some(total) => total as usize,
        None if fetched < self.page_size => return Ok(records),
        None => usize::MAX,
      };
      if records.len() >= total {
        return Ok(records);
      }
      if fetched == 0 {
        return Err(StoreError::BackendUnavailable(format!(
          "search on {} stopped at {} of {} hits",
          T::cache().name(),
          records.len(),
          total
        )));
      }
      debug!(cache = T::cache().name(), fetched = records.len(), total, "Fetching next search page");
    }
  }
}

/// Grouped, protostream-encoded distributed cache definition.
fn cache_config(cache: LogicalCache) -> Value {
  json!({
    "distributed-cache": {
      "mode": "SYNC",
      "encoding": { "media-type": "application/x-protostream" },
      "groups": { "enabled": true },
      "indexing": {
        "enabled": true,
        "storage": "local-heap",
        "indexed-entities": [type_name(cache)]
      }
    }
  })
}

fn type_name(cache: LogicalCache) -> String {
  format!("{}.{}", SCHEMA_PACKAGE, cache.message())
}

/// Quote a string literal for an Ickle query.
fn ickle_literal(value: &str) -> String {
  format!("'{}'", value.replace('\'', "''"))
}

/// Serialize a record with the `_type` hint the cluster needs to transcode it.
fn typed_json<T: Cacheable>(value: &T) -> StoreResult<Value> {
  let mut json = serde_json::to_value(value)?;
  match json.as_object_mut() {
    Some(map) => {
      map.insert("_type".to_string(), Value::String(type_name(T::cache())));
      Ok(json)
    }
    None => Err(StoreError::Codec(format!(
      "{} record did not serialize to an object",
      T::cache().message()
    ))),
  }
}

#[async_trait]
impl CacheStorage for ClusteredStore {
  async fn get<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<Option<T>> {
    let response = self
      .entry_request(Method::GET, T::cache(), key)
      .header(header::ACCEPT, "application/json")
      .send()
      .await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let value = response.error_for_status()?.json::<T>().await?;
    Ok(Some(value))
  }

  async fn contains<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<bool> {
    let response = self
      .entry_request(Method::HEAD, T::cache(), key)
      .send()
      .await?;
    match response.status() {
      StatusCode::NOT_FOUND => Ok(false),
      _ => {
        response.error_for_status()?;
        Ok(true)
      }
    }
  }

  async fn put<T: Cacheable>(&self, key: &GroupedKey, value: &T) -> StoreResult<()> {
    debug!(cache = T::cache().name(), key = %key, "put");
    self
      .entry_request(Method::PUT, T::cache(), key)
      .json(&typed_json(value)?)
      .send()
      .await?
      .error_for_status()?;
    Ok(())
  }

  async fn put_all<T: Cacheable>(&self, entries: &HashMap<GroupedKey, T>) -> StoreResult<()> {
    // The REST API has no bulk write; entries already written stay written if
    // a later one fails.
    futures::future::try_join_all(entries.iter().map(|(key, value)| self.put(key, value))).await?;
    Ok(())
  }

  async fn remove<T: Cacheable>(&self, key: &GroupedKey) -> StoreResult<()> {
    let response = self
      .entry_request(Method::DELETE, T::cache(), key)
      .send()
      .await?;
    if response.status() != StatusCode::NOT_FOUND {
      response.error_for_status()?;
    }
    Ok(())
  }

  async fn values<T: Cacheable>(&self) -> StoreResult<Vec<T>> {
    self
      .search(&format!("FROM {}", type_name(T::cache())))
      .await
  }

  async fn find_by_project<T: Cacheable>(&self, project_id: &str) -> StoreResult<Vec<T>> {
    let query = format!(
      "FROM {} WHERE projectId = {}",
      type_name(T::cache()),
      ickle_literal(project_id)
    );
    self.search(&query).await
  }

  async fn is_ready(&self) -> bool {
    let url = self.url(&["rest", "v2", "cache-managers", "default", "health", "status"]);
    let response = match self.request(Method::GET, url).send().await {
      Ok(r) => r,
      Err(e) => {
        warn!(error = %e, "Cluster health check failed");
        return false;
      }
    };
    if !response.status().is_success() {
      return false;
    }
    match response.text().await {
      Ok(status) => status.trim().starts_with("HEALTHY"),
      Err(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ProjectFile;
  use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn mount_bootstrap(server: &MockServer) {
    Mock::given(method("PUT"))
      .and(path("/rest/v2/schemas/projcache.proto"))
      .respond_with(ResponseTemplate::new(200))
      .mount(server)
      .await;
    Mock::given(method("HEAD"))
      .and(path("/rest/v2/caches/projects"))
      .respond_with(ResponseTemplate::new(200))
      .mount(server)
      .await;
    Mock::given(method("HEAD"))
      .and(path("/rest/v2/caches/files"))
      .respond_with(ResponseTemplate::new(200))
      .mount(server)
      .await;
    Mock::given(method("HEAD"))
      .and(path("/rest/v2/caches/statuses"))
      .respond_with(ResponseTemplate::new(200))
      .mount(server)
      .await;
  }

  async fn connect(server: &MockServer) -> ClusteredStore {
    ClusteredStore::connect(&server.uri(), None, Duration::from_secs(2))
      .await
      .unwrap()
  }

  #[test]
  fn test_ickle_literal_escapes_quotes() {
    assert_eq!(ickle_literal("it's"), "'it''s'");
  }

  #[test]
  fn test_typed_json_adds_type_hint() {
    let json = typed_json(&ProjectFile::new("x.yaml", "flows:", "p1")).unwrap();
    assert_eq!(json["_type"], "projcache.ProjectFile");
    assert_eq!(json["projectId"], "p1");
  }

  #[tokio::test]
  async fn test_connect_creates_missing_caches_only() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
      .and(path("/rest/v2/schemas/projcache.proto"))
      .and(body_string_contains("message ProjectFile"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("HEAD"))
      .and(path("/rest/v2/caches/projects"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;
    for name in ["files", "statuses"] {
      Mock::given(method("HEAD"))
        .and(path(format!("/rest/v2/caches/{}", name)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    }
    Mock::given(method("POST"))
      .and(path("/rest/v2/caches/files"))
      .and(body_string_contains("application/x-protostream"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/rest/v2/caches/statuses"))
      .respond_with(ResponseTemplate::new(409))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/rest/v2/caches/projects"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    connect(&server).await;
  }

  #[tokio::test]
  async fn test_connect_fails_when_unreachable() {
    let result = ClusteredStore::connect("http://127.0.0.1:9", None, Duration::from_millis(500)).await;
    assert!(matches!(result, Err(StoreError::Startup(_))));
  }

  #[tokio::test]
  async fn test_put_sends_typed_json() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;
    let f = ProjectFile::new("x.yaml", "flows:", "p1");
    Mock::given(method("PUT"))
      .and(path("/rest/v2/caches/files/p1::x.yaml"))
      .and(header("Key-Content-Type", "text/plain; charset=UTF-8"))
      .and(body_json(json!({
        "name": "x.yaml",
        "code": "flows:",
        "projectId": "p1",
        "_type": "projcache.ProjectFile"
      })))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;

    let store = connect(&server).await;
    store.put(&f.key(), &f).await.unwrap();
  }

  #[tokio::test]
  async fn test_get_missing_is_none() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;
    Mock::given(method("GET"))
      .and(path("/rest/v2/caches/files/p1::nope.yaml"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let store = connect(&server).await;
    let found: Option<ProjectFile> = store
      .get(&GroupedKey::new("p1", "nope.yaml"))
      .await
      .unwrap();
    assert!(found.is_none());
  }

  #[tokio::test]
  async fn test_find_by_project_runs_ickle_query() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;
    Mock::given(method("GET"))
      .and(path("/rest/v2/caches/files"))
      .and(query_param("action", "search"))
      .and(query_param(
        "query",
        "FROM projcache.ProjectFile WHERE projectId = 'p1'",
      ))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "hit_count": 2,
        "hits": [
          { "hit": { "_type": "projcache.ProjectFile", "name": "a.yaml", "code": "", "projectId": "p1" } },
          { "hit": { "_type": "projcache.ProjectFile", "name": "b.yaml", "code": "", "projectId": "p1" } }
        ]
      })))
      .mount(&server)
      .await;

    let store = connect(&server).await;
    let files: Vec<ProjectFile> = store.find_by_project("p1").await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.project_id == "p1"));
  }

  fn file_hit(name: &str) -> Value {
    json!({ "hit": { "_type": "projcache.ProjectFile", "name": name, "code": "", "projectId": "p1" } })
  }

  #[tokio::test]
  async fn test_search_follows_pages_up_to_hit_count() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;
    Mock::given(method("GET"))
      .and(path("/rest/v2/caches/files"))
      .and(query_param("offset", "0"))
      .and(query_param("max_results", "2"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "hit_count": 3,
        "hits": [file_hit("a.yaml"), file_hit("b.yaml")]
      })))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/rest/v2/caches/files"))
      .and(query_param("offset", "2"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "hit_count": 3,
        "hits": [file_hit("c.yaml")]
      })))
      .expect(1)
      .mount(&server)
      .await;

    let store = connect(&server).await.with_page_size(2);
    let files: Vec<ProjectFile> = store.find_by_project("p1").await.unwrap();
    let mut names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    names.sort();
    assert_eq!(names, ["a.yaml", "b.yaml", "c.yaml"]);
  }

  #[tokio::test]
  async fn test_search_short_of_hit_count_is_an_error() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;
    Mock::given(method("GET"))
      .and(path("/rest/v2/caches/files"))
      .and(query_param("offset", "0"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "hit_count": 5,
        "hits": [file_hit("a.yaml"), file_hit("b.yaml")]
      })))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/rest/v2/caches/files"))
      .and(query_param("offset", "2"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "hit_count": 5,
        "hits": []
      })))
      .mount(&server)
      .await;

    let store = connect(&server).await.with_page_size(2);
    let result: StoreResult<Vec<ProjectFile>> = store.values().await;
    assert!(matches!(result, Err(StoreError::BackendUnavailable(_))));
  }

  #[tokio::test]
  async fn test_rejected_query_is_not_unavailable() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;
    Mock::given(method("GET"))
      .and(path("/rest/v2/caches/files"))
      .and(query_param("action", "search"))
      .respond_with(ResponseTemplate::new(400).set_body_string("ISPN014036: bad query"))
      .mount(&server)
      .await;

    let store = connect(&server).await;
    let err = store.find_by_project::<ProjectFile>("p1").await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected(_)));
    assert!(!err.is_unavailable());
  }

  #[tokio::test]
  async fn test_server_error_is_unavailable() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;
    Mock::given(method("DELETE"))
      .and(path("/rest/v2/caches/files/p1::x.yaml"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let store = connect(&server).await;
    let err = store
      .remove::<ProjectFile>(&GroupedKey::new("p1", "x.yaml"))
      .await
      .unwrap_err();
    assert!(err.is_unavailable());
  }

  #[tokio::test]
  async fn test_is_ready_reads_health_status() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;
    Mock::given(method("GET"))
      .and(path("/rest/v2/cache-managers/default/health/status"))
      .respond_with(ResponseTemplate::new(200).set_body_string("DEGRADED"))
      .mount(&server)
      .await;

    let store = connect(&server).await;
    assert!(!store.is_ready().await);
  }
}
