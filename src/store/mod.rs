mod cache;
mod catalog;
mod jobs;
mod schema;
mod sqlite;

pub use jobs::backoff_seconds;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::types::*;

/// Durable, prioritized work queue with retry backoff.
pub trait JobQueue: Send + Sync {
    /// Queues a job unless an equivalent one is already pending, running or
    /// waiting for a retry. Returns whether a job became queued.
    fn enqueue_job(&self, job: &NewJob) -> Result<bool>;
    /// Atomically claims the most urgent eligible job.
    fn dequeue_job(&self) -> Result<Option<SyncJob>>;
    fn complete_job(&self, id: i64) -> Result<()>;
    fn fail_job(&self, id: i64, message: &str) -> Result<()>;
    fn delete_completed_jobs(&self, older_than: Duration) -> Result<usize>;

    fn get_job(&self, id: i64) -> Result<Option<SyncJob>>;
    fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64>;
    /// Jobs that exhausted their attempts.
    fn list_dead_jobs(&self) -> Result<Vec<SyncJob>>;
}

/// Mirrored registry metadata.
pub trait CatalogStore: Send + Sync {
    // Registry operations
    /// Returns the registry row for `name`, creating it if needed. A stored
    /// row with a different host is deleted together with everything under
    /// it and recreated.
    fn ensure_registry(&self, name: &str, host: &str) -> Result<Registry>;
    fn get_registry(&self, name: &str) -> Result<Option<Registry>>;
    fn list_registries(&self) -> Result<Vec<Registry>>;
    fn set_registry_status(&self, name: &str, status: i64) -> Result<()>;
    fn delete_registry(&self, name: &str) -> Result<bool>;

    // Repository operations
    fn ensure_repository(&self, registry: &str, host: &str, name: &str) -> Result<Repository>;
    fn get_repository(&self, registry: &str, name: &str) -> Result<Option<Repository>>;
    fn list_repository_names(&self, registry: &str) -> Result<Vec<String>>;
    fn delete_repository(&self, registry: &str, name: &str) -> Result<bool>;

    // Tag operations
    fn get_tag(&self, registry: &str, repository: &str, name: &str) -> Result<Option<Tag>>;
    /// Tag name to digest for one repository.
    fn list_tag_digests(&self, registry: &str, repository: &str)
    -> Result<BTreeMap<String, String>>;
    fn delete_tag(&self, registry: &str, repository: &str, name: &str) -> Result<bool>;
    /// Persists a fetched image and points its tag at it in one transaction.
    fn save_tag_image(&self, image: &ImageRecord) -> Result<Tag>;

    // Manifest operations
    fn get_manifest(&self, digest: &str) -> Result<Option<Manifest>>;
    fn list_platform_manifests(&self, list_digest: &str) -> Result<Vec<Manifest>>;
    fn list_manifest_layers(&self, digest: &str) -> Result<Vec<ManifestLayer>>;
}

/// Number of cache rows recomputed by a refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshCounts {
    pub repositories: usize,
    pub tags: usize,
}

/// Materialized per-repository and per-tag aggregates.
pub trait CacheStore: Send + Sync {
    /// Recomputes every cache row and drops rows whose source is gone.
    fn refresh_all(&self) -> Result<RefreshCounts>;
    /// Recomputes only rows with a dirty marker and clears those markers.
    fn refresh_all_dirty(&self) -> Result<RefreshCounts>;
    fn mark_all_dirty(&self) -> Result<()>;
    fn count_dirty(&self) -> Result<RefreshCounts>;

    fn get_repository_stats(&self, repo_id: i64) -> Result<Option<RepositoryStats>>;
    fn list_repository_stats(&self) -> Result<Vec<RepositoryStats>>;
    fn get_tag_details(&self, tag_id: i64) -> Result<Option<TagDetails>>;
}

/// Store defines the database interface.
pub trait Store: JobQueue + CatalogStore + CacheStore {
    fn initialize(&self) -> Result<()>;
}
