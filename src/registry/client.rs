use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, LINK, USER_AGENT};
use serde::de::DeserializeOwned;

use super::types::{
    CatalogResponse, HeadManifest, HealthStatus, MANIFEST_ACCEPT, ManifestResponse, TagsResponse,
};
use super::{RegistryClient, RegistryError};
use crate::config::RegistryConfig;

const DIGEST_HEADER: &str = "Docker-Content-Digest";
const USER_AGENT_VALUE: &str = concat!("regsync/", env!("CARGO_PKG_VERSION"));

/// Upper bound on followed `Link` pages, guarding against a registry that
/// keeps pointing at itself.
const MAX_PAGES: usize = 10_000;

/// Blocking client for the registry HTTP API v2.
pub struct HttpRegistryClient {
    name: String,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    http: Client,
}

impl HttpRegistryClient {
    pub fn new(config: &RegistryConfig, timeout: Duration) -> Result<Self, RegistryError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
        })
    }

    fn url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .http
            .request(method, self.url(path))
            .header(USER_AGENT, USER_AGENT_VALUE);
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => req.basic_auth(user, Some(pass)),
            _ => req,
        }
    }

    /// Sends the request and turns any non-2xx answer into
    /// `RegistryError::Status`, keeping the body for diagnostics.
    fn send(&self, req: RequestBuilder) -> Result<Response, RegistryError> {
        let resp = req.send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<(T, Option<String>), RegistryError> {
        let resp = self.send(self.request(Method::GET, path))?;
        let next = next_page(resp.headers());
        let bytes = resp.bytes()?;
        Ok((serde_json::from_slice(&bytes)?, next))
    }

    /// Collects every page of a listing by following `rel="next"` links.
    fn get_paginated<T, F>(&self, first: &str, mut extract: F) -> Result<Vec<String>, RegistryError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Vec<String>,
    {
        let mut items = Vec::new();
        let mut next = Some(first.to_string());
        let mut pages = 0;

        while let Some(path) = next.take() {
            let (page, link) = self.get_json::<T>(&path)?;
            items.extend(extract(page));
            pages += 1;
            if pages >= MAX_PAGES {
                tracing::warn!("{}: stopped following pagination after {pages} pages", self.name);
                break;
            }
            next = link.filter(|l| *l != path);
        }

        Ok(items)
    }
}

/// Extracts the target of a `Link: <...>; rel="next"` header.
fn next_page(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    parse_next_link(link)
}

fn parse_next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"" || p.trim() == "rel=next");
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_string())
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl RegistryClient for HttpRegistryClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn health_check(&self) -> HealthStatus {
        match self.request(Method::GET, "/v2/").send() {
            Ok(resp) => HealthStatus::Status(resp.status().as_u16()),
            Err(e) => {
                tracing::debug!("{}: health check failed: {e}", self.name);
                HealthStatus::Unreachable
            }
        }
    }

    fn list_repositories(&self) -> Result<Vec<String>, RegistryError> {
        self.get_paginated("/v2/_catalog", |page: CatalogResponse| page.repositories)
    }

    fn list_tags(&self, repo: &str) -> Result<Vec<String>, RegistryError> {
        self.get_paginated(&format!("/v2/{repo}/tags/list"), |page: TagsResponse| {
            page.tags.unwrap_or_default()
        })
    }

    fn get_manifest(&self, repo: &str, reference: &str) -> Result<ManifestResponse, RegistryError> {
        let req = self
            .request(Method::GET, &format!("/v2/{repo}/manifests/{reference}"))
            .header(ACCEPT, MANIFEST_ACCEPT);
        let resp = self.send(req)?;
        let content_type = header_str(resp.headers(), CONTENT_TYPE.as_str());
        let digest = header_str(resp.headers(), DIGEST_HEADER);
        let body = resp.bytes()?;
        ManifestResponse::parse(&body, content_type.as_deref(), digest.as_deref())
    }

    fn head_manifest(&self, repo: &str, reference: &str) -> Result<HeadManifest, RegistryError> {
        let req = self
            .request(Method::HEAD, &format!("/v2/{repo}/manifests/{reference}"))
            .header(ACCEPT, MANIFEST_ACCEPT);
        let resp = self.send(req)?;
        let digest = header_str(resp.headers(), DIGEST_HEADER)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| RegistryError::InvalidHeader(format!("{DIGEST_HEADER} missing")))?;
        Ok(HeadManifest {
            digest,
            media_type: header_str(resp.headers(), CONTENT_TYPE.as_str()).unwrap_or_default(),
        })
    }

    fn get_blob(&self, repo: &str, digest: &str) -> Result<Vec<u8>, RegistryError> {
        let resp = self.send(self.request(Method::GET, &format!("/v2/{repo}/blobs/{digest}")))?;
        Ok(resp.bytes()?.to_vec())
    }
}
