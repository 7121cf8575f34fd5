//! Container download with ordered mirror fallback.
//!
//! Each mirror gets one attempt, bounded by a long timeout. The body
//! streams into `<name>.partial`, is synced, then renamed into place, so a
//! file under its final name is always complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wx_common::StepKey;

use crate::config::ModelConfig;

/// Default bound on a single mirror attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(600);

/// Moves bytes from a URL to a local path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write the body of `url` to `dest`, synced, returning the byte count.
    async fn download(&self, url: &str, dest: &Path, cancel: &CancellationToken) -> Result<u64>;

    /// Whether `url` exists, by a HEAD probe.
    async fn exists(&self, url: &str) -> Result<bool>;
}

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &str, dest: &Path, cancel: &CancellationToken) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")?;
        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }

        let mut file = fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => bail!("download cancelled"),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.context("Error reading response chunk")?;
            file.write_all(&chunk)
                .await
                .context("Error writing to file")?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn exists(&self, url: &str) -> Result<bool> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .context("HEAD request failed")?;
        Ok(response.status().is_success())
    }
}

/// One failed mirror attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    pub url: String,
    pub error: String,
}

/// A container in place, with the failures it took to get there.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub path: PathBuf,
    pub failures: Vec<MirrorFailure>,
}

/// Every mirror failed.
#[derive(Debug, Clone, Error)]
#[error("failed to fetch {filename} from {} mirror(s)", attempts.len())]
pub struct FetchFailure {
    pub filename: String,
    pub attempts: Vec<MirrorFailure>,
}

/// Downloads one container per (step, file category).
pub struct SourceFetcher {
    transport: Arc<dyn Transport>,
    model: Arc<ModelConfig>,
    attempt_timeout: Duration,
}

impl SourceFetcher {
    pub fn new(transport: Arc<dyn Transport>, model: Arc<ModelConfig>) -> Self {
        Self {
            transport,
            model,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Fetch the `category` container of `step` into `dest_dir`.
    ///
    /// An existing non-empty file is returned without network access.
    /// Mirrors are tried strictly in order, once each.
    #[instrument(skip(self, dest_dir, cancel), fields(step = %step))]
    pub async fn fetch(
        &self,
        step: &StepKey,
        category: &str,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<Fetched, FetchFailure> {
        let Some(filename) = self.model.filename(step, category) else {
            return Err(FetchFailure {
                filename: format!("<{}>", category),
                attempts: vec![MirrorFailure {
                    url: String::new(),
                    error: format!("unknown file category '{}'", category),
                }],
            });
        };
        let dest = dest_dir.join(&filename);

        if let Ok(meta) = fs::metadata(&dest).await {
            if meta.len() > 0 {
                debug!(path = %dest.display(), "Container already present");
                return Ok(Fetched {
                    path: dest,
                    failures: Vec::new(),
                });
            }
        }

        let failure = |attempts| FetchFailure {
            filename: filename.clone(),
            attempts,
        };

        if let Err(e) = fs::create_dir_all(dest_dir).await {
            return Err(failure(vec![MirrorFailure {
                url: String::new(),
                error: format!("cannot create {}: {}", dest_dir.display(), e),
            }]));
        }

        let partial = dest_dir.join(format!("{}.partial", filename));
        let mut failures = Vec::new();

        for url in self.model.urls(step, category) {
            if cancel.is_cancelled() {
                break;
            }
            metrics::counter!("fetch_attempts_total").increment(1);

            match self.attempt(&url, &partial, &dest, cancel).await {
                Ok(bytes) => {
                    info!(
                        url = %url,
                        path = %dest.display(),
                        bytes = bytes,
                        failed_mirrors = failures.len(),
                        "Download completed"
                    );
                    return Ok(Fetched {
                        path: dest,
                        failures,
                    });
                }
                Err(e) => {
                    metrics::counter!("fetch_failures_total").increment(1);
                    warn!(mirror = %url, error = %e, "Mirror failed");
                    failures.push(MirrorFailure {
                        url,
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(failure(failures))
    }

    async fn attempt(
        &self,
        url: &str,
        partial: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let bytes = tokio::time::timeout(
            self.attempt_timeout,
            self.transport.download(url, partial, cancel),
        )
        .await
        .map_err(|_| anyhow!("timed out after {}s", self.attempt_timeout.as_secs()))??;

        if bytes == 0 {
            bail!("empty response body");
        }
        finalize(partial, dest).await?;
        Ok(bytes)
    }
}

/// Move `partial` to `dest`, copying when a rename is not possible.
async fn finalize(partial: &Path, dest: &Path) -> Result<()> {
    if fs::rename(partial, dest).await.is_err() {
        fs::copy(partial, dest)
            .await
            .with_context(|| format!("Failed to move download to {}", dest.display()))?;
        fs::remove_file(partial).await.ok();
    }
    Ok(())
}
