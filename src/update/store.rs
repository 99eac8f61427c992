//! On-disk layout of downloaded artifacts.
//!
//! ```text
//! <root>/
//!   latest.yml                 cached manifest (document transport)
//!   2.0.0/
//!     installer.exe            committed, verified artifact
//!     installer.exe.part       download in progress or rejected download
//! ```
//!
//! The committed path is the identity of a downloaded version. Nothing here
//! removes artifacts of other versions.

use crate::error::{Error, Result};
use crate::update::integrity::Verified;
use crate::update::manifest::ManifestFormat;
use crate::update::LocalArtifact;
use semver::Version;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const INSTALLER_STEM: &str = "installer";
const STAGING_SUFFIX: &str = "part";

/// Version-keyed artifact directory tree.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    extension: String,
}

impl ArtifactStore {
    /// Open the store at `root`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            extension: extension.into(),
        })
    }

    /// Root of the tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Installer extension used for every version.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Directory holding one version's files.
    #[must_use]
    pub fn version_dir(&self, version: &Version) -> PathBuf {
        self.root.join(version.to_string())
    }

    /// Committed artifact path for `version`.
    #[must_use]
    pub fn path_for(&self, version: &Version) -> PathBuf {
        self.version_dir(version)
            .join(format!("{INSTALLER_STEM}.{}", self.extension))
    }

    /// Where a download for `version` is written before it is committed.
    #[must_use]
    pub fn staging_path_for(&self, version: &Version) -> PathBuf {
        self.version_dir(version).join(format!(
            "{INSTALLER_STEM}.{}.{STAGING_SUFFIX}",
            self.extension
        ))
    }

    /// `true` if the version directory and its committed artifact exist.
    ///
    /// Existence alone does not make an artifact usable; it still has to
    /// pass verification.
    #[must_use]
    pub fn exists(&self, version: &Version) -> bool {
        self.version_dir(version).is_dir() && self.path_for(version).is_file()
    }

    /// Create the version directory. An existing directory is fine.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_dir(&self, version: &Version) -> Result<PathBuf> {
        let dir = self.version_dir(version);
        match std::fs::create_dir(&dir) {
            Ok(()) => debug!("Created {}", dir.display()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            // Root removed since the store was opened.
            Err(e) if e.kind() == ErrorKind::NotFound => std::fs::create_dir_all(&dir)?,
            Err(e) => return Err(e.into()),
        }
        Ok(dir)
    }

    /// Move a verified staged download to its committed path.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    pub fn commit(
        &self,
        version: &Version,
        staged: &Path,
        verified: &Verified,
    ) -> Result<LocalArtifact> {
        let path = self.path_for(version);
        if staged != path {
            std::fs::rename(staged, &path).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "failed to commit {} to {}: {e}",
                        staged.display(),
                        path.display()
                    ),
                ))
            })?;
        }

        debug!("Committed {version} at {}", path.display());
        Ok(LocalArtifact {
            version: version.clone(),
            path,
            size_bytes: verified.size_bytes,
            verified: true,
        })
    }

    /// Record an already-committed artifact that passed re-verification.
    #[must_use]
    pub fn reuse(&self, version: &Version, verified: &Verified) -> LocalArtifact {
        LocalArtifact {
            version: version.clone(),
            path: self.path_for(version),
            size_bytes: verified.size_bytes,
            verified: true,
        }
    }

    /// Path of the cached raw manifest.
    #[must_use]
    pub fn manifest_cache_path(&self, format: ManifestFormat) -> PathBuf {
        self.root.join(format!("latest.{}", format.extension()))
    }

    /// Versions with a directory in the tree, oldest first.
    ///
    /// Directories whose names are not versions are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be listed.
    pub fn versions(&self) -> Result<Vec<Version>> {
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().to_str().map(Version::parse) {
                Some(Ok(version)) => versions.push(version),
                _ => warn!(
                    "Ignoring non-version directory {}",
                    entry.path().display()
                ),
            }
        }
        versions.sort();
        Ok(versions)
    }
}
