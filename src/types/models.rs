use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registry row mirrored from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub id: i64,
    pub name: String,
    pub host: String,
    /// Last observed HTTP status from a health check or catalog fetch, `-1`
    /// when the health check could not connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub registry_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub repo_id: i64,
    pub name: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub digest: String,
    pub media_type: String,
    /// Empty for manifest lists and indexes.
    pub os: String,
    /// Empty for manifest lists and indexes.
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub size_bytes: i64,
    /// A list containing this platform manifest. A manifest can belong to
    /// several lists; this names one of them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_list_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLayer {
    pub manifest_digest: String,
    pub layer_digest: String,
    pub size_bytes: i64,
}

/// Cached per-repository aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryStats {
    pub id: i64,
    pub registry_id: i64,
    pub registry_name: String,
    pub registry_host: String,
    pub name: String,
    pub tags_count: i64,
    pub total_size: i64,
    pub architectures: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Cached per-tag aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagDetails {
    pub id: i64,
    pub repo_id: i64,
    pub name: String,
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest_created: Option<String>,
    pub total_size_in_bytes: i64,
    pub updated_at: DateTime<Utc>,
}
