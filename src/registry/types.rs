use std::collections::BTreeMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::RegistryError;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Accept header sent on every manifest request so the registry may answer
/// with either a single manifest or a list.
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json,\
application/vnd.docker.distribution.manifest.list.v2+json,\
application/vnd.oci.image.manifest.v1+json,\
application/vnd.oci.image.index.v1+json";

/// True for Docker manifest lists and OCI image indexes.
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type.contains("manifest.list") || media_type.contains("image.index")
}

/// `sha256:<hex>` of the given bytes.
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub repositories: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TagsResponse {
    /// Registries return `null` for a repository whose tags were all deleted.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: i64,
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
}

/// Entry of a manifest list pointing at a platform-specific manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDescriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: i64,
    pub digest: String,
    #[serde(default)]
    pub platform: Platform,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestBody {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<PlatformDescriptor>,
}

/// A fetched manifest: either a single image manifest (config + layers) or
/// a list/index (platform descriptors).
#[derive(Debug, Clone)]
pub struct ManifestResponse {
    pub media_type: String,
    pub digest: String,
    pub config: Option<Descriptor>,
    pub layers: Vec<Descriptor>,
    pub manifests: Vec<PlatformDescriptor>,
}

impl ManifestResponse {
    /// Builds a manifest from a response body. The media type falls back to
    /// `Content-Type` when the body omits it, and the digest falls back to the
    /// sha256 of the body when `Docker-Content-Digest` is missing.
    pub fn parse(
        raw_body: &[u8],
        content_type: Option<&str>,
        content_digest: Option<&str>,
    ) -> Result<Self, RegistryError> {
        let body: ManifestBody = serde_json::from_slice(raw_body)?;

        let media_type = body
            .media_type
            .filter(|m| !m.is_empty())
            .or_else(|| {
                content_type
                    .map(|c| c.split(';').next().unwrap_or(c).trim().to_string())
                    .filter(|c| c.starts_with("application/vnd."))
            })
            .unwrap_or_else(|| {
                if body.manifests.is_empty() {
                    OCI_MANIFEST_V1.to_string()
                } else {
                    OCI_INDEX_V1.to_string()
                }
            });

        let digest = match content_digest.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => d.to_string(),
            None => sha256_digest(raw_body),
        };

        Ok(Self {
            media_type,
            digest,
            config: body.config,
            layers: body.layers,
            manifests: body.manifests,
        })
    }

    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.media_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadManifest {
    pub digest: String,
    pub media_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigSection {
    #[serde(default, rename = "Labels")]
    labels: Option<BTreeMap<String, String>>,
}

/// The fields of an image config blob the mirror keeps.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigBlob {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    config: Option<ConfigSection>,
}

impl ConfigBlob {
    pub fn parse(bytes: &[u8]) -> Result<Self, RegistryError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .filter(|l| !l.is_empty())
    }
}

/// Outcome of the `GET /v2/` health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Status(u16),
    Unreachable,
}

impl HealthStatus {
    pub const UNREACHABLE_CODE: i64 = -1;

    /// Value stored in `registries.last_status`.
    pub fn code(self) -> i64 {
        match self {
            Self::Status(code) => i64::from(code),
            Self::Unreachable => Self::UNREACHABLE_CODE,
        }
    }
}
