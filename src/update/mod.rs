//! Building blocks of an update cycle.
//!
//! This module handles:
//! - Fetching and parsing the release manifest
//! - Comparing the advertised version with the running one
//! - Streaming the installer into a version-keyed local store
//! - Verifying size and digest before an artifact is trusted
//! - Launching the platform's native installer

mod client;
mod download;
mod integrity;
mod manifest;
mod platform;
mod store;
mod version;

pub use client::ManifestClient;
pub use download::{DownloadReport, Downloader};
pub use integrity::{digest_path, ExpectedHash, HashAlgorithm, IntegrityVerifier, Verified};
pub use manifest::{Arch, ArtifactRef, ManifestFormat, PlatformTag, ReleaseManifest};
pub use platform::{derive_pkg_url, Platform, PlatformInstaller};
pub use store::ArtifactStore;
pub use version::{is_newer, parse_version, precedence};

use semver::Version;
use std::path::PathBuf;

/// An installer on local disk that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    /// Release the installer belongs to.
    pub version: Version,
    /// Committed path, `<local_folder>/<version>/installer.<ext>`.
    pub path: PathBuf,
    /// Size on disk.
    pub size_bytes: u64,
    /// Whether verification passed when this record was made.
    pub verified: bool,
}
