//! Error types for tiny-updater.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during an update cycle or an install.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure reaching the manifest or artifact host.
    #[error("Network error: {0}")]
    Network(String),

    /// Manifest body is not valid JSON or YAML.
    #[error("Manifest parse error: {0}")]
    Parse(String),

    /// Manifest parsed but is missing required data.
    #[error("Manifest schema error: {0}")]
    Schema(String),

    /// Artifact transfer failed or was aborted.
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Artifact failed verification.
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// No install action exists for the host OS.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The manifest offers nothing installable on this platform.
    #[error("No artifact for platform {0} in manifest")]
    NoMatchingArtifact(String),

    /// Launching the installer failed.
    #[error("Install error: {0}")]
    Install(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while streaming an artifact to disk.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// URL could not be parsed.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// URL scheme is neither http nor https.
    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    /// Request could not be sent or the server answered with an error status.
    #[error("request failed: {0}")]
    Request(String),

    /// Body stream broke mid-transfer.
    #[error("stream error after {downloaded} bytes: {reason}")]
    Stream {
        /// Bytes written before the failure.
        downloaded: u64,
        /// Transport message.
        reason: String,
    },

    /// Server closed the body before the announced length.
    #[error("download incomplete: received {downloaded} of {total} bytes")]
    Incomplete {
        /// Bytes received.
        downloaded: u64,
        /// Announced content length.
        total: u64,
    },

    /// Writing to the destination failed.
    #[error("write to '{path}' failed: {source}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Transfer was cancelled by the caller.
    #[error("download cancelled after {downloaded} bytes")]
    Cancelled {
        /// Bytes written before cancellation.
        downloaded: u64,
    },
}

/// Reasons a downloaded artifact is not trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// No file at the expected path.
    #[error("artifact missing at '{0}'")]
    Missing(PathBuf),

    /// File is not larger than the size floor.
    #[error("artifact too small: {actual} bytes, must exceed {minimum}")]
    TooSmall {
        /// Size on disk.
        actual: u64,
        /// Configured floor.
        minimum: u64,
    },

    /// Digest does not match the manifest.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Digest from the manifest.
        expected: String,
        /// Digest of the file.
        actual: String,
    },

    /// Manifest hash is in a format no supported digest produces.
    #[error("unrecognized hash format '{0}'")]
    UnrecognizedHash(String),

    /// File could not be read while hashing.
    #[error("failed to read artifact: {0}")]
    Unreadable(String),
}

/// Coarse classification of an [`Error`], carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Network`].
    Network,
    /// See [`Error::Parse`].
    Parse,
    /// See [`Error::Schema`].
    Schema,
    /// See [`Error::Download`].
    Download,
    /// See [`Error::Integrity`].
    Integrity,
    /// See [`Error::UnsupportedPlatform`].
    UnsupportedPlatform,
    /// See [`Error::NoMatchingArtifact`].
    NoMatchingArtifact,
    /// See [`Error::Install`].
    Install,
    /// See [`Error::Config`].
    Config,
    /// See [`Error::Io`].
    Io,
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Schema(_) => ErrorKind::Schema,
            Self::Download(_) => ErrorKind::Download,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            Self::NoMatchingArtifact(_) => ErrorKind::NoMatchingArtifact,
            Self::Install(_) => ErrorKind::Install,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}
