//! Configuration for the updater.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Envelope member holding the manifest in API responses.
pub const DEFAULT_PAYLOAD_KEY: &str = "application_data";

/// Where the release manifest comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ManifestSource {
    /// Static JSON or YAML document fetched with GET.
    Document {
        /// Manifest URL, e.g. `https://example.com/latest.yml`.
        url: String,
    },
    /// Request/response API answered with a JSON envelope.
    Api {
        /// Endpoint receiving the POST.
        endpoint: String,
        /// Envelope member holding the manifest.
        #[serde(default = "default_payload_key")]
        payload_key: String,
    },
}

impl ManifestSource {
    /// Document source at `url`.
    #[must_use]
    pub fn document(url: impl Into<String>) -> Self {
        Self::Document { url: url.into() }
    }

    /// API source at `endpoint` using the default envelope key.
    #[must_use]
    pub fn api(endpoint: impl Into<String>) -> Self {
        Self::Api {
            endpoint: endpoint.into(),
            payload_key: default_payload_key(),
        }
    }

    /// The URL requests are sent to.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Document { url } => url,
            Self::Api { endpoint, .. } => endpoint,
        }
    }
}

/// Updater configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Version of the running application.
    pub current_version: Version,

    /// Root of the artifact tree, created if absent.
    pub local_folder: PathBuf,

    /// Milliseconds between scheduled checks.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// User-Agent header for every request.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Artifacts must be strictly larger than this many bytes.
    #[serde(default)]
    pub min_size_bytes: u64,

    /// Per-request timeout for manifest fetches, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Minimum spacing of progress events, in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Bytes after which a progress event is sent regardless of spacing.
    #[serde(default = "default_progress_step_bytes")]
    pub progress_step_bytes: u64,

    /// Release manifest location.
    pub manifest_source: ManifestSource,
}

fn default_payload_key() -> String {
    DEFAULT_PAYLOAD_KEY.to_string()
}

const fn default_check_interval_ms() -> u64 {
    30 * 60 * 1000 // 30 minutes
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_progress_interval_ms() -> u64 {
    250
}

const fn default_progress_step_bytes() -> u64 {
    1024 * 1024
}

/// Platform cache directory for an application's downloaded updates.
///
/// Falls back to `.<app>/updates` in the working directory when no home
/// directory can be determined.
#[must_use]
pub fn default_local_folder(app_name: &str) -> PathBuf {
    directories::ProjectDirs::from("", "", app_name)
        .map(|dirs| dirs.cache_dir().join("updates"))
        .unwrap_or_else(|| PathBuf::from(format!(".{app_name}")).join("updates"))
}

impl UpdaterConfig {
    /// Create a configuration with default timing.
    #[must_use]
    pub fn new(
        current_version: Version,
        manifest_source: ManifestSource,
        local_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            current_version,
            manifest_source,
            local_folder: local_folder.into(),
            check_interval_ms: default_check_interval_ms(),
            user_agent: None,
            min_size_bytes: 0,
            request_timeout_secs: default_request_timeout(),
            progress_interval_ms: default_progress_interval_ms(),
            progress_step_bytes: default_progress_step_bytes(),
        }
    }

    /// Time between scheduled checks.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Manifest request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Minimum spacing between progress events.
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// User-Agent sent with requests; derived from the crate when unset.
    #[must_use]
    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        })
    }

    /// Check the configuration for values the updater cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is zero, the manifest URL is not an
    /// absolute http(s) URL, or the local folder is empty.
    pub fn validate(&self) -> crate::Result<()> {
        if self.check_interval_ms == 0 {
            return Err(crate::Error::Config(
                "check_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.local_folder.as_os_str().is_empty() {
            return Err(crate::Error::Config(
                "local_folder must not be empty".to_string(),
            ));
        }

        let raw = self.manifest_source.url();
        let url = reqwest::Url::parse(raw)
            .map_err(|e| crate::Error::Config(format!("invalid manifest URL '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(crate::Error::Config(format!(
                "manifest URL must be http or https, got '{}'",
                url.scheme()
            )));
        }

        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
