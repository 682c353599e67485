use std::collections::{BTreeMap, HashMap};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

const URL_VAR: &str = "REGISTRY_URL";
const AUTH_VAR: &str = "REGISTRY_AUTH";
const DEFAULT_NAME: &str = "default";

/// Connection settings for one remote registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub name: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RegistryConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            username: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Host (and port) with the URL scheme stripped. This is the identity of
    /// the registry row in the database.
    #[must_use]
    pub fn host(&self) -> String {
        host_from_url(&self.url)
    }

    /// Loads `REGISTRY_URL`/`REGISTRY_AUTH` as the `default` registry and
    /// every `REGISTRY_URL_<SUFFIX>`/`REGISTRY_AUTH_<SUFFIX>` pair as a registry
    /// named after the lowercased suffix.
    pub fn load_from_env() -> Result<Vec<Self>> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let mut configs = Vec::new();

        if let Some(url) = vars.get(URL_VAR).filter(|u| !u.is_empty()) {
            let mut config = Self::new(DEFAULT_NAME, url.clone());
            if let Some(auth) = vars.get(AUTH_VAR).filter(|a| !a.is_empty()) {
                let (user, pass) = decode_auth(auth).map_err(|e| {
                    Error::Config(format!("failed to decode {AUTH_VAR}: {e}"))
                })?;
                config = config.with_credentials(user, pass);
            }
            configs.push(config);
        }

        // Sorted so the registry order does not depend on environment order.
        let prefix = format!("{URL_VAR}_");
        let suffixed: BTreeMap<&str, &String> = vars
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .filter(|suffix| !suffix.is_empty() && !value.is_empty())
                    .map(|suffix| (suffix, value))
            })
            .collect();

        for (suffix, url) in suffixed {
            let name = suffix.to_lowercase();
            if configs.iter().any(|c| c.name == name) {
                return Err(Error::Config(format!(
                    "registry name '{name}' is configured more than once"
                )));
            }
            let mut config = Self::new(name, url.clone());
            let auth_key = format!("{AUTH_VAR}_{suffix}");
            if let Some(auth) = vars.get(&auth_key).filter(|a| !a.is_empty()) {
                let (user, pass) = decode_auth(auth)
                    .map_err(|e| Error::Config(format!("failed to decode {auth_key}: {e}")))?;
                config = config.with_credentials(user, pass);
            }
            configs.push(config);
        }

        if configs.is_empty() {
            return Err(Error::Config(format!(
                "no registry configurations found ({URL_VAR} or {URL_VAR}_* required)"
            )));
        }

        Ok(configs)
    }
}

pub fn host_from_url(url: &str) -> String {
    let host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    host.trim_end_matches('/').to_string()
}

/// Decodes base64 `username:password`.
fn decode_auth(encoded: &str) -> std::result::Result<(String, String), String> {
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| "auth is not valid UTF-8".to_string())?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| "invalid auth format (expected username:password)".to_string())?;
    Ok((user.to_string(), pass.to_string()))
}
