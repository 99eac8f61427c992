//! Release manifest model and parsing.
//!
//! A manifest is the document the release publisher serves to describe the
//! latest version. The accepted shape is
//!
//! ```json
//! { "version": "3.0.0", "files": [ { "url": "app-3.0.0.exe" } ], "hash": "..." }
//! ```
//!
//! or the same structure in YAML. API responses carry the same object inside
//! an envelope and may use the `download_link` / `application_hash` spelling.

use crate::error::{Error, Result};
use crate::update::integrity::ExpectedHash;
use crate::update::version::parse_version;
use reqwest::Url;
use semver::Version;
use serde::{Deserialize, Serialize};

/// Installer format of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformTag {
    /// Debian package.
    Deb,
    /// Windows executable installer.
    Exe,
    /// macOS installer package.
    Pkg,
    /// macOS disk image.
    Dmg,
}

impl PlatformTag {
    /// File extension for this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Deb => "deb",
            Self::Exe => "exe",
            Self::Pkg => "pkg",
            Self::Dmg => "dmg",
        }
    }

    /// Infer the format from the extension of a URL's file name.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let name = file_name(url);
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "deb" => Some(Self::Deb),
            "exe" => Some(Self::Exe),
            "pkg" => Some(Self::Pkg),
            "dmg" => Some(Self::Dmg),
            _ => None,
        }
    }
}

/// CPU architecture an artifact is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86-64.
    #[serde(alias = "x86_64", alias = "amd64")]
    X64,
    /// 64-bit ARM.
    #[serde(alias = "aarch64")]
    Arm64,
}

impl Arch {
    /// Architecture of the running process, if it is one we publish for.
    #[must_use]
    pub fn current() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Self::X64),
            "aarch64" => Some(Self::Arm64),
            _ => None,
        }
    }

    /// Token used in artifact file names.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        }
    }

    /// Infer the architecture from tokens in a file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.contains("arm64") || lower.contains("aarch64") {
            Some(Self::Arm64)
        } else if lower.contains("x64") || lower.contains("x86_64") || lower.contains("amd64") {
            Some(Self::X64)
        } else {
            None
        }
    }
}

/// One downloadable artifact listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Absolute download URL.
    pub url: String,
    /// Installer format, when known.
    pub platform_tag: Option<PlatformTag>,
    /// Target architecture, when known.
    pub arch: Option<Arch>,
}

impl ArtifactRef {
    /// Reference to `url`, inferring format and architecture from its file name.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let platform_tag = PlatformTag::from_url(&url);
        let arch = Arch::from_file_name(file_name(&url));
        Self {
            url,
            platform_tag,
            arch,
        }
    }

    /// Last path segment of the URL.
    #[must_use]
    pub fn file_name(&self) -> &str {
        file_name(&self.url)
    }
}

/// The latest release as described by the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifest {
    /// Released version.
    pub version: Version,
    /// Downloadable artifacts, in manifest order.
    pub artifacts: Vec<ArtifactRef>,
    /// Digest the artifact must match, when published.
    pub expected_hash: Option<String>,
    /// Size floor the artifact must exceed, when published.
    pub min_size_bytes: Option<u64>,
}

/// Serialization format of a manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// JSON document.
    Json,
    /// YAML document.
    Yaml,
}

impl ManifestFormat {
    /// Extension used for the cached copy.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yml",
        }
    }

    /// Pick a format from the URL, then the content type, then the body.
    #[must_use]
    pub fn detect(url: &str, content_type: Option<&str>, body: &[u8]) -> Self {
        let name = file_name(url).to_ascii_lowercase();
        if name.ends_with(".json") {
            return Self::Json;
        }
        if name.ends_with(".yml") || name.ends_with(".yaml") {
            return Self::Yaml;
        }

        if let Some(ct) = content_type.map(str::to_ascii_lowercase) {
            if ct.contains("json") {
                return Self::Json;
            }
            if ct.contains("yaml") {
                return Self::Yaml;
            }
        }

        match body.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Self::Json,
            _ => Self::Yaml,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    files: Vec<RawArtifact>,
    #[serde(default)]
    download_link: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    application_hash: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    md5: Option<String>,
    #[serde(default, alias = "minSizeBytes")]
    min_size_bytes: Option<u64>,
}

impl RawManifest {
    /// First published digest in order `hash`, `application_hash`, `sha256`,
    /// `md5`. Algorithm-named fields gain the matching prefix.
    fn expected_hash(&self) -> Option<String> {
        let non_empty = |h: &Option<String>| {
            h.as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
        };
        let named = |h: &Option<String>, algorithm: &str| {
            non_empty(h).map(|h| {
                if h.contains(':') {
                    h
                } else {
                    format!("{algorithm}:{h}")
                }
            })
        };

        non_empty(&self.hash)
            .or_else(|| non_empty(&self.application_hash))
            .or_else(|| named(&self.sha256, "sha256"))
            .or_else(|| named(&self.md5, "md5"))
    }
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    url: String,
    #[serde(default)]
    platform: Option<PlatformTag>,
    #[serde(default)]
    arch: Option<Arch>,
}

impl ReleaseManifest {
    /// Parse a manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the body is not valid in `format`, and
    /// [`Error::Schema`] if it lacks a valid version or any artifact.
    pub fn parse(body: &[u8], format: ManifestFormat) -> Result<Self> {
        let value: serde_json::Value = match format {
            ManifestFormat::Json => serde_json::from_slice(body)
                .map_err(|e| Error::Parse(format!("invalid JSON manifest: {e}")))?,
            ManifestFormat::Yaml => serde_yaml::from_slice(body)
                .map_err(|e| Error::Parse(format!("invalid YAML manifest: {e}")))?,
        };
        Self::from_value(value)
    }

    /// Build a manifest from an already-parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the value is not a manifest object, the
    /// version is missing or invalid, no artifact is listed, or the published
    /// digest names no supported algorithm.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Schema("manifest is not an object".to_string()));
        }

        let raw: RawManifest = serde_json::from_value(value)
            .map_err(|e| Error::Schema(format!("unexpected manifest shape: {e}")))?;

        let version = raw
            .version
            .as_deref()
            .ok_or_else(|| Error::Schema("manifest has no version".to_string()))
            .and_then(parse_version)?;

        let expected_hash = raw.expected_hash();
        if let Some(hash) = &expected_hash {
            ExpectedHash::parse(hash)
                .map_err(|e| Error::Schema(format!("manifest for {version}: {e}")))?;
        }

        let mut artifacts: Vec<ArtifactRef> = raw
            .files
            .into_iter()
            .map(|file| {
                let mut artifact = ArtifactRef::new(file.url);
                if file.platform.is_some() {
                    artifact.platform_tag = file.platform;
                }
                if file.arch.is_some() {
                    artifact.arch = file.arch;
                }
                artifact
            })
            .collect();

        if let Some(link) = raw.download_link {
            artifacts.push(ArtifactRef::new(link));
        }

        if artifacts.is_empty() {
            return Err(Error::Schema(format!(
                "manifest for {version} lists no artifacts"
            )));
        }

        Ok(Self {
            version,
            artifacts,
            expected_hash,
            min_size_bytes: raw.min_size_bytes,
        })
    }

    /// Resolve relative artifact URLs against the manifest's own URL.
    #[must_use]
    pub fn resolve_against(mut self, base: &Url) -> Self {
        for artifact in &mut self.artifacts {
            if Url::parse(&artifact.url).is_err() {
                if let Ok(joined) = base.join(&artifact.url) {
                    artifact.url = joined.to_string();
                }
            }
        }
        self
    }
}

fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}
