//! # tiny-updater
//!
//! Self-update support for desktop applications.
//!
//! An [`Updater`] periodically fetches a release manifest, compares the
//! advertised version with the running one, streams the platform's installer
//! into a version-keyed local folder, verifies its size and digest, and on
//! request launches the native installer.
//!
//! ## Usage
//!
//! ```no_run
//! use tiny_updater::{ManifestSource, Updater, UpdaterConfig, UpdateEvent};
//!
//! # async fn run() -> tiny_updater::Result<()> {
//! let config = UpdaterConfig::new(
//!     semver::Version::new(1, 0, 2),
//!     ManifestSource::document("https://releases.example.com/latest.yml"),
//!     tiny_updater::default_local_folder("my-app"),
//! );
//! let updater = Updater::new(config)?;
//! let mut events = updater.subscribe();
//! updater.start();
//!
//! while let Ok(event) = events.recv().await {
//!     if let UpdateEvent::UpdatesDownloaded { .. } = event {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod config;
pub mod error;
pub mod event;
pub mod update;
mod updater;

pub use config::{default_local_folder, ManifestSource, UpdaterConfig};
pub use error::{DownloadError, Error, ErrorKind, IntegrityError, Result};
pub use event::{UpdateEvent, UpdateEventsChannel};
pub use update::{LocalArtifact, Platform, PlatformInstaller, ReleaseManifest};
pub use updater::{CycleOutcome, CycleReport, Phase, Updater, UpdaterBuilder};
