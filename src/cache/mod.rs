//! Grouped key/value storage with interchangeable backends.
//!
//! This module provides:
//! - An embedded backend: one preloaded, write-through SQLite file per cache
//! - A clustered backend: caches on a remote Infinispan-compatible cluster
//! - A startup hook that picks exactly one of them

mod bootstrap;
mod clustered;
mod embedded;
mod storage;
mod traits;

pub use bootstrap::bootstrap;
pub use clustered::{ClusteredStore, Credentials, SCHEMA_PACKAGE};
pub use embedded::EmbeddedStore;
pub use storage::{Backend, CacheStorage};
pub use traits::{Cacheable, LogicalCache};
