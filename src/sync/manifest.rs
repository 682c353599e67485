use tracing::{debug, warn};

use crate::config::host_from_url;
use crate::error::Result;
use crate::registry::RegistryClient;
use crate::registry::types::{ConfigBlob, Descriptor, ManifestResponse, PlatformDescriptor};
use crate::store::CatalogStore;
use crate::types::{ImageRecord, LayerRecord, ManifestRecord, Tag};

/// Fetches a tag's manifest (and, for lists, every platform manifest) and
/// persists the result.
pub struct ManifestProcessor<'a> {
    client: &'a dyn RegistryClient,
}

impl<'a> ManifestProcessor<'a> {
    pub fn new(client: &'a dyn RegistryClient) -> Self {
        Self { client }
    }

    /// Fetches, classifies and stores `repository:tag`. All network calls
    /// finish before the single write transaction starts.
    pub fn process<S>(&self, store: &S, repository: &str, tag: &str) -> Result<Tag>
    where
        S: CatalogStore + ?Sized,
    {
        let image = self.fetch(repository, tag)?;
        store.save_tag_image(&image)
    }

    pub fn fetch(&self, repository: &str, tag: &str) -> Result<ImageRecord> {
        let manifest = self.client.get_manifest(repository, tag)?;

        let (record, platforms) = if manifest.is_index() {
            let platforms: Vec<ManifestRecord> = manifest
                .manifests
                .iter()
                .filter_map(|descriptor| match self.fetch_platform(repository, descriptor) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(
                            "Skipping platform {} of {repository}:{tag}: {e}",
                            descriptor.digest
                        );
                        None
                    }
                })
                .collect();
            let record = ManifestRecord {
                digest: manifest.digest.clone(),
                media_type: manifest.media_type.clone(),
                ..Default::default()
            };
            (record, platforms)
        } else {
            (self.single_record(repository, &manifest), Vec::new())
        };

        Ok(ImageRecord {
            registry_name: self.client.name().to_string(),
            registry_host: host_from_url(self.client.base_url()),
            repository: repository.to_string(),
            tag: tag.to_string(),
            manifest: record,
            platforms,
        })
    }

    /// Platform manifests take os/arch from the list entry.
    fn fetch_platform(
        &self,
        repository: &str,
        descriptor: &PlatformDescriptor,
    ) -> Result<ManifestRecord> {
        let manifest = self.client.get_manifest(repository, &descriptor.digest)?;
        let config = self.config_blob(repository, manifest.config.as_ref());

        Ok(ManifestRecord {
            digest: descriptor.digest.clone(),
            media_type: manifest.media_type.clone(),
            os: descriptor.platform.os.clone(),
            architecture: descriptor.platform.architecture.clone(),
            created: config.as_ref().and_then(|c| c.created.clone()),
            labels: config.as_ref().and_then(labels_value),
            layers: layer_records(&manifest),
        })
    }

    /// Single manifests take os/arch from their config blob.
    fn single_record(&self, repository: &str, manifest: &ManifestResponse) -> ManifestRecord {
        let config = self.config_blob(repository, manifest.config.as_ref());

        ManifestRecord {
            digest: manifest.digest.clone(),
            media_type: manifest.media_type.clone(),
            os: config.as_ref().map(|c| c.os.clone()).unwrap_or_default(),
            architecture: config
                .as_ref()
                .map(|c| c.architecture.clone())
                .unwrap_or_default(),
            created: config.as_ref().and_then(|c| c.created.clone()),
            labels: config.as_ref().and_then(labels_value),
            layers: layer_records(manifest),
        }
    }

    fn config_blob(&self, repository: &str, config: Option<&Descriptor>) -> Option<ConfigBlob> {
        let config = config?;
        let blob = self
            .client
            .get_blob(repository, &config.digest)
            .map_err(crate::Error::from)
            .and_then(|bytes| ConfigBlob::parse(&bytes).map_err(crate::Error::from));

        match blob {
            Ok(blob) => Some(blob),
            Err(e) => {
                debug!("No config for {repository}@{}: {e}", config.digest);
                None
            }
        }
    }
}

fn layer_records(manifest: &ManifestResponse) -> Vec<LayerRecord> {
    manifest
        .layers
        .iter()
        .map(|layer| LayerRecord {
            digest: layer.digest.clone(),
            size_bytes: layer.size,
        })
        .collect()
}

fn labels_value(config: &ConfigBlob) -> Option<serde_json::Value> {
    config
        .labels()
        .and_then(|labels| serde_json::to_value(labels).ok())
}
