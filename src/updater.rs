//! Update orchestration: the periodic check loop and the per-cycle state machine.

use crate::config::UpdaterConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::event::{create_event_channel, UpdateEvent, UpdateEventsChannel, UpdateEventsSender};
use crate::update::{
    is_newer, ArtifactStore, Downloader, IntegrityVerifier, LocalArtifact, ManifestClient,
    PlatformInstaller, ReleaseManifest, Verified,
};
use parking_lot::Mutex;
use reqwest::Client;
use semver::Version;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Store extension on hosts without an installer format. Cycles on such
/// hosts fail before anything is written.
const FALLBACK_EXTENSION: &str = "bin";

/// Where the updater is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No cycle has run yet.
    Idle,
    /// Fetching the manifest.
    Checking,
    /// The running version is current.
    UpToDate,
    /// A newer release is advertised.
    UpdateAvailable,
    /// A previously downloaded artifact passed re-verification.
    AlreadyVerified,
    /// Streaming the artifact.
    Downloading,
    /// Checking size and digest of a fresh download.
    Verifying,
    /// A verified artifact is committed.
    Ready,
    /// The cycle or install stopped on an error.
    Failed,
    /// Launching the installer.
    Installing,
    /// Installer launched.
    Done,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing newer than the running version.
    UpToDate {
        /// Version the manifest advertised.
        latest: Version,
    },
    /// A verified artifact is ready to install.
    Ready(LocalArtifact),
    /// The cycle stopped on an error.
    Failed {
        /// Failure class.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
}

/// Phases one cycle went through and where it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Phases in the order they were entered.
    pub phases: Vec<Phase>,
    /// Final result.
    pub outcome: CycleOutcome,
}

impl CycleReport {
    /// The artifact a successful cycle produced.
    #[must_use]
    pub fn artifact(&self) -> Option<&LocalArtifact> {
        match &self.outcome {
            CycleOutcome::Ready(artifact) => Some(artifact),
            _ => None,
        }
    }
}

/// Builder for constructing an [`Updater`].
pub struct UpdaterBuilder {
    config: UpdaterConfig,
    installer: Option<PlatformInstaller>,
    http_client: Option<Client>,
}

impl UpdaterBuilder {
    /// Create a new builder with the given configuration.
    #[must_use]
    pub fn new(config: UpdaterConfig) -> Self {
        Self {
            config,
            installer: None,
            http_client: None,
        }
    }

    /// Target an explicit platform instead of the running host.
    #[must_use]
    pub fn installer(mut self, installer: PlatformInstaller) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Validate the configuration and assemble the updater.
    ///
    /// The local folder is created here. No network traffic happens until
    /// [`Updater::start`] or [`Updater::check_now`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the local folder
    /// cannot be created, or the HTTP client cannot be built.
    pub fn build(self) -> Result<Updater> {
        let config = self.config;
        config.validate()?;
        info!(
            "Building updater for version {} from {}",
            config.current_version,
            config.manifest_source.url()
        );

        let installer = self.installer.unwrap_or_else(PlatformInstaller::detect);
        let extension = match installer.extension() {
            Ok(extension) => extension,
            Err(e) => {
                warn!("{e}; updates will be checked but never downloaded");
                FALLBACK_EXTENSION
            }
        };
        let store = ArtifactStore::new(&config.local_folder, extension)?;

        let user_agent = config.user_agent();
        let http = match self.http_client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(user_agent.clone())
                .connect_timeout(config.request_timeout())
                .build()
                .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?,
        };

        let manifests = ManifestClient::new(http.clone(), config.manifest_source.clone(), user_agent)
            .with_timeout(config.request_timeout())
            .with_cache(store.clone());
        let downloader = Downloader::new(
            http,
            config.progress_interval(),
            config.progress_step_bytes,
        );
        let verifier = IntegrityVerifier::new(config.min_size_bytes);
        let (events_tx, _) = create_event_channel();

        Ok(Updater {
            inner: Arc::new(Inner {
                config,
                manifests,
                downloader,
                verifier,
                installer,
                store,
                events_tx,
                in_flight: AtomicBool::new(false),
                timer_started: AtomicBool::new(false),
                phase: Mutex::new(Phase::Idle),
                download_cancel: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

/// Handle to a self-updater. Clones share the same state.
#[derive(Clone)]
pub struct Updater {
    inner: Arc<Inner>,
}

struct Inner {
    config: UpdaterConfig,
    manifests: ManifestClient,
    downloader: Downloader,
    verifier: IntegrityVerifier,
    installer: PlatformInstaller,
    store: ArtifactStore,
    events_tx: UpdateEventsSender,
    in_flight: AtomicBool,
    timer_started: AtomicBool,
    phase: Mutex<Phase>,
    download_cancel: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

/// Holds the in-flight flag for the duration of one cycle.
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Records the phases of one cycle and mirrors them into the shared cell.
struct CycleTrace<'a> {
    phase: &'a Mutex<Phase>,
    phases: Vec<Phase>,
}

impl CycleTrace<'_> {
    fn enter(&mut self, phase: Phase) {
        debug!("Update cycle phase: {phase:?}");
        *self.phase.lock() = phase;
        self.phases.push(phase);
    }
}

impl Updater {
    /// Build an updater for the running host.
    ///
    /// # Errors
    ///
    /// See [`UpdaterBuilder::build`].
    pub fn new(config: UpdaterConfig) -> Result<Self> {
        UpdaterBuilder::new(config).build()
    }

    /// Configuration the updater was built with.
    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.inner.config
    }

    /// Local artifact tree.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }

    /// Platform the updater installs for.
    #[must_use]
    pub fn installer(&self) -> &PlatformInstaller {
        &self.inner.installer
    }

    /// Most recently entered phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock()
    }

    /// `true` while a cycle is running.
    #[must_use]
    pub fn is_checking(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Subscribe to updater events.
    #[must_use]
    pub fn subscribe(&self) -> UpdateEventsChannel {
        self.inner.events_tx.subscribe()
    }

    /// Start the periodic check loop.
    ///
    /// The first check runs immediately, then once per configured interval.
    /// Ticks missed while a cycle runs are skipped. Returns `None` if the loop
    /// is already running or the updater was shut down.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.inner.shutdown.is_cancelled() {
            warn!("Updater is shut down; not starting the timer");
            return None;
        }
        if self.inner.timer_started.swap(true, Ordering::AcqRel) {
            warn!("Update timer already running");
            return None;
        }

        let inner = Arc::clone(&self.inner);
        let period = inner.config.check_interval();
        info!("Starting update checks every {:?}", period);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(report) = inner.trigger().await {
                            debug!("Scheduled cycle finished: {:?}", report.outcome);
                        }
                    }
                }
            }

            info!("Update timer stopped");
        }))
    }

    /// Run one cycle now.
    ///
    /// Returns `None` without doing anything if a cycle is already in flight
    /// or the updater was shut down. Errors never escape; they end up in the
    /// report and as an `error` event.
    pub async fn check_now(&self) -> Option<CycleReport> {
        self.inner.trigger().await
    }

    /// Cancel the transfer of the running cycle, if any.
    ///
    /// Returns `true` if a transfer was in progress.
    pub fn cancel_download(&self) -> bool {
        match self.inner.download_cancel.lock().as_ref() {
            Some(token) => {
                info!("Cancelling artifact download");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop the timer and cancel any transfer. Later triggers are ignored.
    pub fn shutdown(&self) {
        info!("Shutting down updater");
        self.inner.shutdown.cancel();
    }

    /// Launch the platform installer for a committed artifact.
    ///
    /// Emits `installing` before the launch. On hosts without an install
    /// action, emits `unsupported-platform` and spawns nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPlatform`] on such hosts and
    /// [`Error::Install`] if the artifact is unverified or cannot be launched.
    pub fn install(&self, artifact: &LocalArtifact) -> Result<()> {
        let inner = &self.inner;

        if let Err(e) = inner.installer.extension() {
            let os = inner.installer.platform().name().to_string();
            warn!("Install requested on unsupported platform {os}");
            inner.emit(UpdateEvent::UnsupportedPlatform { os });
            inner.emit_error(&e);
            return Err(e);
        }

        if !artifact.verified {
            let e = Error::Install(format!(
                "refusing to install unverified artifact {}",
                artifact.path.display()
            ));
            inner.emit_error(&e);
            return Err(e);
        }

        *inner.phase.lock() = Phase::Installing;
        inner.emit(UpdateEvent::Installing {
            version: artifact.version.clone(),
        });

        match inner.installer.install(&artifact.path) {
            Ok(()) => {
                info!("Installer for {} launched", artifact.version);
                *inner.phase.lock() = Phase::Done;
                Ok(())
            }
            Err(e) => {
                warn!("Install of {} failed: {e}", artifact.version);
                *inner.phase.lock() = Phase::Failed;
                inner.emit_error(&e);
                Err(e)
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: UpdateEvent) {
        debug!("Emitting {}", event.name());
        let _ = self.events_tx.send(event);
    }

    fn emit_error(&self, error: &Error) {
        self.emit(UpdateEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    async fn trigger(&self) -> Option<CycleReport> {
        if self.shutdown.is_cancelled() {
            debug!("Updater shut down; trigger ignored");
            return None;
        }
        let Some(_guard) = CycleGuard::acquire(&self.in_flight) else {
            debug!("Update cycle already in flight; trigger dropped");
            return None;
        };

        let mut trace = CycleTrace {
            phase: &self.phase,
            phases: Vec::new(),
        };
        let outcome = match self.run_cycle(&mut trace).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Update cycle failed: {e}");
                trace.enter(Phase::Failed);
                self.emit_error(&e);
                CycleOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };

        Some(CycleReport {
            phases: trace.phases,
            outcome,
        })
    }

    async fn run_cycle(&self, trace: &mut CycleTrace<'_>) -> Result<CycleOutcome> {
        trace.enter(Phase::Checking);
        let manifest = self.manifests.fetch().await?;
        let current = &self.config.current_version;

        if !is_newer(&manifest.version, current) {
            info!(
                "Running version {} is current (latest {})",
                current, manifest.version
            );
            trace.enter(Phase::UpToDate);
            self.emit(UpdateEvent::ActualVersion {
                latest: manifest.version.clone(),
            });
            return Ok(CycleOutcome::UpToDate {
                latest: manifest.version,
            });
        }

        let version = manifest.version.clone();
        info!("Update available: {} -> {}", current, version);
        trace.enter(Phase::UpdateAvailable);
        self.emit(UpdateEvent::UpdatesAvailable {
            version: version.clone(),
        });

        let artifact = self.installer.select_artifact(&manifest)?;
        self.store.ensure_dir(&version)?;
        let manifest = Arc::new(manifest);

        if self.store.exists(&version) {
            let path = self.store.path_for(&version);
            match self.verify(path, Arc::clone(&manifest)).await {
                Ok(verified) => {
                    info!("Reusing verified artifact for {}", version);
                    trace.enter(Phase::AlreadyVerified);
                    let local = self.store.reuse(&version, &verified);
                    self.emit_downloaded(&local);
                    return Ok(CycleOutcome::Ready(local));
                }
                Err(e) => warn!("Stored artifact for {version} rejected ({e}); downloading again"),
            }
        }

        trace.enter(Phase::Downloading);
        self.emit(UpdateEvent::DownloadingUpdates {
            version: version.clone(),
        });

        let staged = self.store.staging_path_for(&version);
        let cancel = self.shutdown.child_token();
        *self.download_cancel.lock() = Some(cancel.clone());

        let events_tx = self.events_tx.clone();
        let result = self
            .downloader
            .fetch(&artifact.url, &staged, &cancel, |total, downloaded| {
                let _ = events_tx.send(UpdateEvent::DownloadProgress { total, downloaded });
            })
            .await;
        *self.download_cancel.lock() = None;
        result?;

        trace.enter(Phase::Verifying);
        let verified = self.verify(staged.clone(), manifest).await?;
        let local = self.store.commit(&version, &staged, &verified)?;

        trace.enter(Phase::Ready);
        self.emit_downloaded(&local);
        Ok(CycleOutcome::Ready(local))
    }

    async fn verify(&self, path: PathBuf, manifest: Arc<ReleaseManifest>) -> Result<Verified> {
        let verifier = self.verifier;
        tokio::task::spawn_blocking(move || verifier.verify(&path, &manifest))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .map_err(Error::from)
    }

    fn emit_downloaded(&self, artifact: &LocalArtifact) {
        self.emit(UpdateEvent::UpdatesDownloaded {
            version: artifact.version.clone(),
            path: artifact.path.clone(),
        });
    }
}
