//! In-memory registry used by the sync unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use crate::registry::types::{
    DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2, HeadManifest, HealthStatus, ManifestResponse,
    sha256_digest,
};
use crate::registry::{RegistryClient, RegistryError};

#[derive(Default)]
struct State {
    tags: BTreeMap<String, BTreeMap<String, String>>,
    manifests: HashMap<String, (String, Vec<u8>)>,
    blobs: HashMap<String, Vec<u8>>,
    broken_blobs: bool,
    missing: Vec<String>,
}

pub struct MemoryRegistry {
    name: String,
    base_url: String,
    state: Mutex<State>,
    pub head_calls: AtomicUsize,
    pub get_manifest_calls: AtomicUsize,
}

fn not_found(what: &str) -> RegistryError {
    RegistryError::Status {
        status: 404,
        body: format!("{what} not found"),
    }
}

impl MemoryRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: "https://registry.example.com".to_string(),
            state: Mutex::new(State::default()),
            head_calls: AtomicUsize::new(0),
            get_manifest_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Config blob failures leave created/labels empty.
    pub fn break_blobs(&self) {
        self.state().broken_blobs = true;
    }

    /// Makes a manifest digest unfetchable.
    pub fn hide_manifest(&self, digest: &str) {
        self.state().missing.push(digest.to_string());
    }

    pub fn add_repository(&self, repo: &str) {
        self.state().tags.entry(repo.to_string()).or_default();
    }

    pub fn remove_repository(&self, repo: &str) {
        self.state().tags.remove(repo);
    }

    pub fn remove_tag(&self, repo: &str, tag: &str) {
        if let Some(tags) = self.state().tags.get_mut(repo) {
            tags.remove(tag);
        }
    }

    /// Stores a single-platform manifest and returns its digest.
    pub fn put_manifest(&self, arch: &str, created: &str, layers: &[(&str, i64)]) -> String {
        let config = serde_json::to_vec(&json!({
            "created": created,
            "os": "linux",
            "architecture": arch,
            "config": {"Labels": {"org.example.arch": arch}},
        }))
        .unwrap();
        let config_digest = sha256_digest(&config);

        let body = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_V2,
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": config.len(),
                "digest": config_digest,
            },
            "layers": layers.iter().map(|(digest, size)| json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": size,
                "digest": digest,
            })).collect::<Vec<_>>(),
        }))
        .unwrap();
        let digest = sha256_digest(&body);

        let mut state = self.state();
        state.blobs.insert(config_digest, config);
        state
            .manifests
            .insert(digest.clone(), (DOCKER_MANIFEST_V2.to_string(), body));
        digest
    }

    /// Stores a manifest list over existing platform manifests.
    pub fn put_index(&self, platforms: &[(&str, &str)]) -> String {
        let body = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_LIST_V2,
            "manifests": platforms.iter().map(|(arch, digest)| json!({
                "mediaType": DOCKER_MANIFEST_V2,
                "size": 1,
                "digest": digest,
                "platform": {"architecture": arch, "os": "linux"},
            })).collect::<Vec<_>>(),
        }))
        .unwrap();
        let digest = sha256_digest(&body);
        self.state()
            .manifests
            .insert(digest.clone(), (DOCKER_MANIFEST_LIST_V2.to_string(), body));
        digest
    }

    pub fn tag(&self, repo: &str, tag: &str, digest: &str) {
        self.state()
            .tags
            .entry(repo.to_string())
            .or_default()
            .insert(tag.to_string(), digest.to_string());
    }

    fn resolve(&self, repo: &str, reference: &str) -> Result<(String, String, Vec<u8>), RegistryError> {
        let state = self.state();
        let digest = if reference.starts_with("sha256:") {
            reference.to_string()
        } else {
            state
                .tags
                .get(repo)
                .and_then(|tags| tags.get(reference))
                .cloned()
                .ok_or_else(|| not_found(reference))?
        };
        if state.missing.contains(&digest) {
            return Err(not_found(&digest));
        }
        let (media_type, body) = state.manifests.get(&digest).cloned().ok_or_else(|| not_found(&digest))?;
        Ok((digest, media_type, body))
    }
}

impl RegistryClient for MemoryRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn health_check(&self) -> HealthStatus {
        HealthStatus::Status(200)
    }

    fn list_repositories(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.state().tags.keys().cloned().collect())
    }

    fn list_tags(&self, repo: &str) -> Result<Vec<String>, RegistryError> {
        self.state()
            .tags
            .get(repo)
            .map(|tags| tags.keys().cloned().collect())
            .ok_or_else(|| not_found(repo))
    }

    fn get_manifest(&self, repo: &str, reference: &str) -> Result<ManifestResponse, RegistryError> {
        self.get_manifest_calls.fetch_add(1, Ordering::SeqCst);
        let (digest, media_type, body) = self.resolve(repo, reference)?;
        ManifestResponse::parse(&body, Some(&media_type), Some(&digest))
    }

    fn head_manifest(&self, repo: &str, reference: &str) -> Result<HeadManifest, RegistryError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let (digest, media_type, _) = self.resolve(repo, reference)?;
        Ok(HeadManifest { digest, media_type })
    }

    fn get_blob(&self, _repo: &str, digest: &str) -> Result<Vec<u8>, RegistryError> {
        let state = self.state();
        if state.broken_blobs {
            return Err(RegistryError::Status {
                status: 500,
                body: "blob store unavailable".to_string(),
            });
        }
        state.blobs.get(digest).cloned().ok_or_else(|| not_found(digest))
    }
}
