//! Project store with an embedded or clustered backend, and the periodic jobs
//! that keep it healthy and in sync.
//!
//! Startup order: [`cache::bootstrap`] selects the backend, the result is
//! wrapped in a [`CacheService`], and only then are jobs started with
//! [`jobs::start`] or request handlers given the service.

pub mod cache;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod scheduler;
pub mod service;

pub use error::{StoreError, StoreResult};
pub use model::{GroupedKey, Project, ProjectFile, ProjectStatus};
pub use service::CacheService;
