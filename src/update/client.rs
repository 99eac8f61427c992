//! Release manifest retrieval.

use crate::config::ManifestSource;
use crate::error::{Error, Result};
use crate::update::manifest::{ManifestFormat, ReleaseManifest};
use crate::update::store::ArtifactStore;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fetches the latest release manifest from a document URL or an API endpoint.
#[derive(Debug, Clone)]
pub struct ManifestClient {
    http: Client,
    source: ManifestSource,
    user_agent: String,
    timeout: Option<Duration>,
    /// Tree whose root caches document manifests as `latest.<ext>`.
    cache: Option<ArtifactStore>,
}

impl ManifestClient {
    /// Create a client for `source`.
    #[must_use]
    pub fn new(http: Client, source: ManifestSource, user_agent: impl Into<String>) -> Self {
        Self {
            http,
            source,
            user_agent: user_agent.into(),
            timeout: None,
            cache: None,
        }
    }

    /// Cache fetched document manifests at the root of `store`.
    #[must_use]
    pub fn with_cache(mut self, store: ArtifactStore) -> Self {
        self.cache = Some(store);
        self
    }

    /// Bound each manifest request, body included, by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The tracked manifest source.
    #[must_use]
    pub fn source(&self) -> &ManifestSource {
        &self.source
    }

    /// Fetch and parse the current manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the request fails or the server answers
    /// with an error status, [`Error::Parse`] for malformed bodies and
    /// [`Error::Schema`] for bodies that are not a usable manifest.
    pub async fn fetch(&self) -> Result<ReleaseManifest> {
        let manifest = match &self.source {
            ManifestSource::Document { url } => self.fetch_document(url).await?,
            ManifestSource::Api {
                endpoint,
                payload_key,
            } => self.fetch_api(endpoint, payload_key).await?,
        };

        info!(
            "Manifest advertises version {} with {} artifact(s)",
            manifest.version,
            manifest.artifacts.len()
        );
        Ok(manifest)
    }

    async fn fetch_document(&self, url: &str) -> Result<ReleaseManifest> {
        debug!("Fetching manifest document from {}", url);
        let base = parse_url(url)?;

        let response = self
            .request(self.http.get(base.clone()))
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {url} failed: {e}")))?;
        let response = check_status(response, url)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("reading manifest from {url} failed: {e}")))?;

        let format = ManifestFormat::detect(url, content_type.as_deref(), &body);
        let manifest = ReleaseManifest::parse(&body, format)?.resolve_against(&base);

        self.cache_document(format, &body).await;
        Ok(manifest)
    }

    async fn fetch_api(&self, endpoint: &str, payload_key: &str) -> Result<ReleaseManifest> {
        debug!("Requesting manifest from API {}", endpoint);
        let base = parse_url(endpoint)?;

        let response = self
            .request(self.http.post(base.clone()))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| Error::Network(format!("POST {endpoint} failed: {e}")))?;
        let response = check_status(response, endpoint)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("reading response from {endpoint} failed: {e}")))?;

        let mut envelope: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| Error::Parse(format!("invalid JSON response: {e}")))?;

        let payload = envelope
            .get_mut(payload_key)
            .map(serde_json::Value::take)
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::Schema(format!("response has no `{payload_key}` payload")))?;

        Ok(ReleaseManifest::from_value(payload)?.resolve_against(&base))
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(USER_AGENT, &self.user_agent);
        match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    async fn cache_document(&self, format: ManifestFormat, body: &[u8]) {
        let Some(store) = &self.cache else {
            return;
        };
        let path = store.manifest_cache_path(format);
        match tokio::fs::write(&path, body).await {
            Ok(()) => debug!("Cached manifest at {}", path.display()),
            Err(e) => warn!("Failed to cache manifest at {}: {e}", path.display()),
        }
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("invalid manifest URL '{raw}': {e}")))
}

fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Network(format!("{url} returned status {status}")))
    }
}
