//! Streaming artifact downloads.

use crate::error::DownloadError;
use futures::StreamExt;
use reqwest::{Client, Url};
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    /// Bytes written and synced to disk.
    pub bytes: u64,
    /// Length the server announced, if any.
    pub total: Option<u64>,
}

/// Rate limiter for progress callbacks.
#[derive(Debug)]
struct ProgressThrottle {
    interval: Duration,
    step: u64,
    last_at: Instant,
    last_bytes: u64,
}

impl ProgressThrottle {
    fn new(interval: Duration, step: u64) -> Self {
        Self {
            interval,
            step: step.max(1),
            last_at: Instant::now(),
            last_bytes: 0,
        }
    }

    fn ready(&mut self, downloaded: u64) -> bool {
        let due = self.last_at.elapsed() >= self.interval
            || downloaded.saturating_sub(self.last_bytes) >= self.step;
        if due {
            self.last_at = Instant::now();
            self.last_bytes = downloaded;
        }
        due
    }
}

/// Streams HTTP(S) bodies to files.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    progress_interval: Duration,
    progress_step_bytes: u64,
}

impl Downloader {
    /// Create a downloader sharing `client`.
    #[must_use]
    pub fn new(client: Client, progress_interval: Duration, progress_step_bytes: u64) -> Self {
        Self {
            client,
            progress_interval,
            progress_step_bytes,
        }
    }

    /// Download `url` into `destination`.
    ///
    /// `progress` receives `(total, downloaded)` at a bounded rate and once
    /// more when the body is complete. The call returns only after the file
    /// is flushed, synced and closed. On failure the partial file is removed.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] describing why the transfer was abandoned.
    pub async fn fetch<F>(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> Result<DownloadReport, DownloadError>
    where
        F: FnMut(Option<u64>, u64) + Send,
    {
        let url = check_url(url)?;
        info!("Downloading {} to {}", url, destination.display());

        match self.stream_to(url, destination, cancel, &mut progress).await {
            Ok(report) => {
                info!(
                    "Downloaded {} bytes to {}",
                    report.bytes,
                    destination.display()
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Download to {} failed: {e}", destination.display());
                remove_partial(destination).await;
                Err(e)
            }
        }
    }

    async fn stream_to<F>(
        &self,
        url: Url,
        destination: &Path,
        cancel: &CancellationToken,
        progress: &mut F,
    ) -> Result<DownloadReport, DownloadError>
    where
        F: FnMut(Option<u64>, u64) + Send,
    {
        let request = self.client.get(url).send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::Cancelled { downloaded: 0 }),
            response = request => response.map_err(|e| DownloadError::Request(e.to_string()))?,
        };
        let response = response
            .error_for_status()
            .map_err(|e| DownloadError::Request(e.to_string()))?;

        let total = response.content_length();
        debug!("Response accepted, content length {total:?}");

        let write_err = |source: std::io::Error| DownloadError::Write {
            path: destination.to_path_buf(),
            source,
        };

        let mut file = File::create(destination).await.map_err(write_err)?;
        let mut stream = response.bytes_stream();
        let mut throttle = ProgressThrottle::new(self.progress_interval, self.progress_step_bytes);
        let mut downloaded: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DownloadError::Cancelled { downloaded }),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| DownloadError::Stream {
                downloaded,
                reason: e.to_string(),
            })?;

            file.write_all(&chunk).await.map_err(write_err)?;
            downloaded += chunk.len() as u64;

            if throttle.ready(downloaded) {
                progress(total, downloaded);
            }
        }

        if let Some(total) = total {
            if downloaded < total {
                return Err(DownloadError::Incomplete { downloaded, total });
            }
        }

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        progress(total, downloaded);

        Ok(DownloadReport {
            bytes: downloaded,
            total,
        })
    }
}

fn check_url(raw: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(raw).map_err(|e| DownloadError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DownloadError::UnsupportedScheme(other.to_string())),
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to remove partial download {}: {e}",
            path.display()
        ),
    }
}
