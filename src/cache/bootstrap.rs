//! Backend selection, run once before anything touches the store.

use tracing::info;

use super::clustered::ClusteredStore;
use super::embedded::EmbeddedStore;
use super::storage::Backend;
use crate::config::Config;
use crate::error::{StoreError, StoreResult};

/// Build the backend the configuration asks for.
///
/// A configured cluster selects the clustered backend; otherwise the embedded
/// store is opened under the data directory. Any failure is a startup failure
/// and is not retried.
pub async fn bootstrap(config: &Config) -> StoreResult<Backend> {
  match &config.cluster {
    None => {
      let root = config
        .data_dir()
        .map_err(|e| StoreError::Startup(e.to_string()))?;
      info!(path = %root.display(), "Store is starting in embedded mode");
      let store = EmbeddedStore::open(&root).map_err(|e| StoreError::Startup(e.to_string()))?;
      Ok(Backend::Embedded(store))
    }
    Some(cluster) => {
      info!(url = %cluster.url, "Store is starting in clustered mode");
      let credentials = config
        .cluster_credentials()
        .map_err(|e| StoreError::Startup(e.to_string()))?;
      let store = ClusteredStore::connect(&cluster.url, credentials, config.request_timeout())
        .await
        .map_err(|e| match e {
          StoreError::Startup(_) => e,
          other => StoreError::Startup(other.to_string()),
        })?;
      Ok(Backend::Clustered(store))
    }
  }
}
