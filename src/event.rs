//! Updater event system.

use crate::error::ErrorKind;
use semver::Version;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Events emitted during update cycles and installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// The running version is the latest.
    ActualVersion {
        /// Version advertised by the manifest.
        latest: Version,
    },

    /// The manifest advertises a newer version.
    UpdatesAvailable {
        /// Newer version.
        version: Version,
    },

    /// Artifact download started.
    DownloadingUpdates {
        /// Version being fetched.
        version: Version,
    },

    /// Bytes written so far.
    DownloadProgress {
        /// Announced size, `None` when the server sent no length.
        total: Option<u64>,
        /// Bytes on disk.
        downloaded: u64,
    },

    /// A verified artifact is ready to install.
    UpdatesDownloaded {
        /// Ready version.
        version: Version,
        /// Committed artifact.
        path: PathBuf,
    },

    /// Installer launch requested.
    Installing {
        /// Version being installed.
        version: Version,
    },

    /// No install action exists for this OS.
    UnsupportedPlatform {
        /// Host OS name.
        os: String,
    },

    /// A cycle or install failed.
    Error {
        /// Failure class.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
}

impl UpdateEvent {
    /// Stable event name consumers match on.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ActualVersion { .. } => "actual-version",
            Self::UpdatesAvailable { .. } => "updates-available",
            Self::DownloadingUpdates { .. } => "downloading-updates",
            Self::DownloadProgress { .. } => "download-progress",
            Self::UpdatesDownloaded { .. } => "updates-downloaded",
            Self::Installing { .. } => "installing",
            Self::UnsupportedPlatform { .. } => "unsupported-platform",
            Self::Error { .. } => "error",
        }
    }
}

/// Channel for receiving updater events.
pub type UpdateEventsChannel = broadcast::Receiver<UpdateEvent>;

/// Sender for updater events.
pub type UpdateEventsSender = broadcast::Sender<UpdateEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (UpdateEventsSender, UpdateEventsChannel) {
    broadcast::channel(256)
}
