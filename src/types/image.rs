use crate::registry::types::is_index_media_type;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRecord {
    pub digest: String,
    pub size_bytes: i64,
}

/// A manifest as fetched from a registry, ready to be persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestRecord {
    pub digest: String,
    pub media_type: String,
    pub os: String,
    pub architecture: String,
    pub created: Option<String>,
    pub labels: Option<serde_json::Value>,
    pub layers: Vec<LayerRecord>,
}

impl ManifestRecord {
    pub fn layers_size(&self) -> i64 {
        self.layers
            .iter()
            .fold(0i64, |total, l| total.saturating_add(l.size_bytes))
    }
}

/// Everything learned about one tag, gathered before any database write.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub registry_name: String,
    pub registry_host: String,
    pub repository: String,
    pub tag: String,
    pub manifest: ManifestRecord,
    /// Platform manifests, populated when `manifest` is a list or index.
    pub platforms: Vec<ManifestRecord>,
}

impl ImageRecord {
    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.manifest.media_type)
    }

    /// Size stored on the tagged manifest: the layer sum for a single
    /// manifest, the sum of platform sizes for a list.
    pub fn total_size(&self) -> i64 {
        if self.is_index() {
            self.platforms
                .iter()
                .fold(0i64, |total, p| total.saturating_add(p.layers_size()))
        } else {
            self.manifest.layers_size()
        }
    }
}
