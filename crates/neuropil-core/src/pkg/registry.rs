//! CouchDB registry client.
//!
//! Only the read side is needed for installation: fetching a package
//! document and downloading tarballs.

use super::document::PackageDocument;
use super::error::PkgError;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Default registry URL.
pub const DEFAULT_REGISTRY: &str = "http://registry.npm.lc/";

/// Environment variable to override registry URL.
pub const REGISTRY_ENV: &str = "NEUROPIL_REGISTRY";
/// Environment variable holding the registry username.
pub const REGISTRY_USER_ENV: &str = "NEUROPIL_REGISTRY_USER";
/// Environment variable holding the registry password.
pub const REGISTRY_PASSWORD_ENV: &str = "NEUROPIL_REGISTRY_PASSWORD";
/// Environment variable holding an HTTP(S) proxy URL.
pub const PROXY_ENV: &str = "NEUROPIL_PROXY";

/// Connection settings for a registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REGISTRY.to_string(),
            username: None,
            password: None,
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Build a config from `NEUROPIL_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |key| std::env::var(key).ok().filter(|v: &String| !v.is_empty());
        Self {
            url: var(REGISTRY_ENV).unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
            username: var(REGISTRY_USER_ENV),
            password: var(REGISTRY_PASSWORD_ENV),
            proxy: var(PROXY_ENV),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Registry client for fetching package documents.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    auth: Option<(String, Option<String>)>,
}

impl RegistryClient {
    /// Create a new registry client.
    ///
    /// # Errors
    /// Returns an error if the URL or proxy is invalid, or the HTTP client
    /// cannot be created.
    pub fn new(config: &RegistryConfig) -> Result<Self, PkgError> {
        // Ensure a trailing slash so joins append instead of replacing
        let raw = if config.url.ends_with('/') {
            config.url.clone()
        } else {
            format!("{}/", config.url)
        };
        let base_url = Url::parse(&raw)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{raw}': {e}")))?;

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(concat!("neuropil/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| PkgError::registry(format!("Invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        let auth = config
            .username
            .clone()
            .map(|user| (user, config.password.clone()));

        Ok(Self {
            base_url,
            http,
            auth,
        })
    }

    /// Create a client from environment configuration.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created.
    pub fn from_env() -> Result<Self, PkgError> {
        Self::new(&RegistryConfig::from_env())
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the HTTP client (for reuse in tarball downloads).
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Fetch the document for a package.
    ///
    /// Document reads are anonymous; credentials are only attached to
    /// tarball downloads from the same host.
    ///
    /// # Errors
    /// - `PkgNotFound` if the registry answers `not_found`
    /// - `Registry` for any other HTTP or transport failure
    pub async fn fetch_document(&self, name: &str) -> Result<PackageDocument, PkgError> {
        let url = self
            .base_url
            .join(&escape_name(name))
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))?;

        let response = self.http.get(url.as_str()).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if !status.is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {status} for '{name}'"
            )));
        }

        let json: serde_json::Value = response.json().await?;

        // CouchDB can report errors in a 200 body
        if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
            if error == "not_found" {
                return Err(PkgError::not_found(name));
            }
            let reason = json.get("reason").and_then(|r| r.as_str()).unwrap_or(error);
            return Err(PkgError::registry(format!(
                "Registry error for '{name}': {reason}"
            )));
        }

        let mut doc = PackageDocument::from_json(json)?;
        if doc.name.is_empty() {
            doc.name = name.to_string();
        }
        Ok(doc)
    }

    /// Start a GET for a tarball, attaching credentials when the tarball is
    /// served by the registry host itself.
    pub(crate) fn tarball_request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.auth {
            Some((user, password)) if self.same_host(url) => {
                request.basic_auth(user, password.as_ref())
            }
            _ => request,
        }
    }

    fn same_host(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| u.host_str() == self.base_url.host_str())
            .unwrap_or(false)
    }
}

/// Escape a package name for use as a document ID.
#[must_use]
pub fn escape_name(name: &str) -> String {
    name.replace('/', "%2F")
}

/// Strip the CouchDB rewrite prefix some registries put in tarball URLs.
///
/// `http://host/registry/_design/app/_rewrite/a/-/a-1.0.0.tgz`
/// becomes `http://host/a/-/a-1.0.0.tgz`.
#[must_use]
pub fn sanitize_tarball_url(url: &str) -> String {
    const PREFIX: &str = "/registry/_design/";
    const SUFFIX: &str = "/_rewrite";

    let lower = url.to_ascii_lowercase();
    let Some(start) = lower.find(PREFIX) else {
        return url.to_string();
    };
    let after_prefix = start + PREFIX.len();
    let Some(app_len) = lower[after_prefix..].find(SUFFIX) else {
        return url.to_string();
    };
    let app = &lower[after_prefix..after_prefix + app_len];
    if app.is_empty() || !app.chars().all(|c| c.is_ascii_lowercase()) {
        return url.to_string();
    }

    let end = after_prefix + app_len + SUFFIX.len();
    format!("{}{}", &url[..start], &url[end..])
}
