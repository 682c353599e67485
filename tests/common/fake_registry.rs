//! A registry API v2 served by axum on a background runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use regsync::registry::types::{DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2, sha256_digest};

const DIGEST_HEADER: &str = "Docker-Content-Digest";

#[derive(Default)]
struct RegistryState {
    tags: BTreeMap<String, BTreeMap<String, String>>,
    manifests: HashMap<String, (String, Vec<u8>)>,
    blobs: HashMap<String, Vec<u8>>,
    page_size: Option<usize>,
    basic_auth: Option<String>,
    omit_digest_header: bool,
    head_requests: usize,
    manifest_gets: usize,
}

type Shared = Arc<Mutex<RegistryState>>;

pub struct FakeRegistry {
    pub base_url: String,
    state: Shared,
}

impl FakeRegistry {
    pub fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route("/v2/", any(ping))
            .route("/v2/{*rest}", any(dispatch))
            .with_state(state.clone());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("listener");
                axum::serve(listener, app).await.expect("serve");
            });
        });

        Self { base_url, state }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap()
    }

    pub fn paginate(&self, page_size: usize) {
        self.state().page_size = Some(page_size);
    }

    pub fn require_auth(&self, username: &str, password: &str) {
        self.state().basic_auth = Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{username}:{password}"))
        ));
    }

    pub fn omit_digest_header(&self) {
        self.state().omit_digest_header = true;
    }

    pub fn head_requests(&self) -> usize {
        self.state().head_requests
    }

    pub fn manifest_gets(&self) -> usize {
        self.state().manifest_gets
    }

    pub fn reset_counters(&self) {
        let mut state = self.state();
        state.head_requests = 0;
        state.manifest_gets = 0;
    }

    /// Stores a single-platform image and returns its manifest digest.
    pub fn put_image(&self, arch: &str, created: &str, layers: &[(&str, i64)]) -> String {
        let config = serde_json::to_vec(&json!({
            "created": created,
            "os": "linux",
            "architecture": arch,
            "config": {"Labels": {"org.opencontainers.image.title": arch}},
        }))
        .unwrap();
        let config_digest = sha256_digest(&config);

        let manifest = serde_json::to_vec(&json!({
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
        let digest = sha256_digest(&manifest);

        let mut state = self.state();
        state.blobs.insert(config_digest, config);
        state
            .manifests
            .insert(digest.clone(), (DOCKER_MANIFEST_V2.to_string(), manifest));
        digest
    }

    /// Stores a manifest list over `(architecture, digest)` platforms.
    pub fn put_index(&self, platforms: &[(&str, &str)]) -> String {
        let manifest = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_LIST_V2,
            "manifests": platforms.iter().map(|(arch, digest)| json!({
                "mediaType": DOCKER_MANIFEST_V2,
                "size": 0,
                "digest": digest,
                "platform": {"architecture": arch, "os": "linux"},
            })).collect::<Vec<_>>(),
        }))
        .unwrap();
        let digest = sha256_digest(&manifest);
        self.state()
            .manifests
            .insert(digest.clone(), (DOCKER_MANIFEST_LIST_V2.to_string(), manifest));
        digest
    }

    pub fn tag(&self, repo: &str, tag: &str, digest: &str) {
        self.state()
            .tags
            .entry(repo.to_string())
            .or_default()
            .insert(tag.to_string(), digest.to_string());
    }

    pub fn remove_tag(&self, repo: &str, tag: &str) {
        if let Some(tags) = self.state().tags.get_mut(repo) {
            tags.remove(tag);
        }
    }

    pub fn remove_repository(&self, repo: &str) {
        self.state().tags.remove(repo);
    }
}

fn error_response(status: StatusCode, code: &str) -> Response {
    let body = json!({"errors": [{"code": code, "message": code.to_lowercase()}]});
    (status, axum::Json(body)).into_response()
}

fn authorized(state: &RegistryState, headers: &HeaderMap) -> bool {
    match &state.basic_auth {
        None => true,
        Some(expected) => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected.as_str()),
    }
}

async fn ping(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED");
    }
    (StatusCode::OK, axum::Json(json!({}))).into_response()
}

async fn dispatch(
    State(state): State<Shared>,
    method: Method,
    headers: HeaderMap,
    Path(rest): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED");
    }

    if rest == "_catalog" {
        let repos: Vec<String> = state.tags.keys().cloned().collect();
        return paginated(&state, "/v2/_catalog", "repositories", repos, &query, None);
    }
    if let Some(repo) = rest.strip_suffix("/tags/list") {
        let Some(tags) = state.tags.get(repo) else {
            return error_response(StatusCode::NOT_FOUND, "NAME_UNKNOWN");
        };
        let tags: Vec<String> = tags.keys().cloned().collect();
        let path = format!("/v2/{repo}/tags/list");
        return paginated(&state, &path, "tags", tags, &query, Some(repo));
    }
    if let Some((repo, reference)) = rest.rsplit_once("/manifests/") {
        return manifest(&mut state, &method, repo, reference);
    }
    if let Some((_, digest)) = rest.rsplit_once("/blobs/") {
        return match state.blobs.get(digest) {
            Some(blob) => (StatusCode::OK, blob.clone()).into_response(),
            None => error_response(StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
        };
    }
    error_response(StatusCode::NOT_FOUND, "UNSUPPORTED")
}

fn paginated(
    state: &RegistryState,
    path: &str,
    field: &str,
    items: Vec<String>,
    query: &HashMap<String, String>,
    name: Option<&str>,
) -> Response {
    let start = query
        .get("last")
        .map(|last| items.iter().position(|i| i == last).map_or(0, |p| p + 1))
        .unwrap_or(0);
    let page_size = state.page_size.unwrap_or(usize::MAX);
    let page: Vec<&String> = items.iter().skip(start).take(page_size).collect();

    let mut body = json!({ field: page });
    if let Some(name) = name {
        body["name"] = json!(name);
    }
    let mut response = (StatusCode::OK, axum::Json(body)).into_response();

    if start + page.len() < items.len() {
        if let Some(last) = page.last() {
            let link = format!("<{path}?last={last}&n={page_size}>; rel=\"next\"");
            if let Ok(value) = link.parse() {
                response.headers_mut().insert(header::LINK, value);
            }
        }
    }
    response
}

fn manifest(state: &mut RegistryState, method: &Method, repo: &str, reference: &str) -> Response {
    let digest = if reference.starts_with("sha256:") {
        Some(reference.to_string())
    } else {
        state.tags.get(repo).and_then(|t| t.get(reference)).cloned()
    };
    let Some(digest) = digest else {
        return error_response(StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN");
    };
    let Some((media_type, body)) = state.manifests.get(&digest).cloned() else {
        return error_response(StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN");
    };

    let body = if *method == Method::HEAD {
        state.head_requests += 1;
        Vec::new()
    } else {
        state.manifest_gets += 1;
        body
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, media_type);
    if !state.omit_digest_header {
        builder = builder.header(DIGEST_HEADER, digest);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
