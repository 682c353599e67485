mod client;
mod error;
mod manager;
pub mod types;

pub use client::HttpRegistryClient;
pub use error::RegistryError;
pub use manager::RegistryManager;
pub use types::{HeadManifest, HealthStatus, ManifestResponse};

/// Operations the sync engine needs from a remote registry.
///
/// Calls are blocking; workers run on OS threads and issue them concurrently.
pub trait RegistryClient: Send + Sync {
    /// Configured registry name.
    fn name(&self) -> &str;

    /// Base URL without a trailing slash.
    fn base_url(&self) -> &str;

    /// `GET /v2/`. Never fails; an unreachable registry is a status of its own.
    fn health_check(&self) -> HealthStatus;

    /// Every repository in the catalog, following pagination.
    fn list_repositories(&self) -> Result<Vec<String>, RegistryError>;

    /// Every tag of `repo`, following pagination.
    fn list_tags(&self, repo: &str) -> Result<Vec<String>, RegistryError>;

    /// Fetches a manifest by tag or digest, negotiating single manifests and
    /// manifest lists in one request.
    fn get_manifest(&self, repo: &str, reference: &str) -> Result<ManifestResponse, RegistryError>;

    /// Resolves a reference to its content digest without transferring the body.
    fn head_manifest(&self, repo: &str, reference: &str) -> Result<HeadManifest, RegistryError>;

    fn get_blob(&self, repo: &str, digest: &str) -> Result<Vec<u8>, RegistryError>;
}
