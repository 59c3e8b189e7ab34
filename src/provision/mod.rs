//! Download-with-fallback provisioning of the install tree.
//!
//! Every manifest entry is fetched once into a staging file that only
//! replaces the destination after a complete download. Any fetch failure
//! discards the staging file and writes the entry's fallback body instead, so
//! a provisioning run can always finish offline. A write failure marks that
//! single entry as failed and the run moves on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use log::{debug, error, info, warn};
use tokio::fs;

use crate::error::ProvisionError;
use crate::networking::{DEFAULT_FETCH_TIMEOUT, Fetcher};
use crate::storage;
use crate::util::{Clock, format_bytes, sha256_hex};

pub mod catalog;
pub mod manifest;

pub use manifest::{FileSpec, Manifest};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Fetched,
    FallbackUsed,
    Failed,
}

impl ProvisionOutcome {
    pub fn label(self) -> &'static str {
        match self {
            ProvisionOutcome::Fetched => "fetched",
            ProvisionOutcome::FallbackUsed => "fallback",
            ProvisionOutcome::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionResult {
    pub relative_path: String,
    pub path: PathBuf,
    pub outcome: ProvisionOutcome,
    pub bytes_written: u64,
    /// Digest of the content now on disk. `None` when nothing was written.
    pub sha256: Option<String>,
    pub elapsed: Duration,
    /// Fetch error for fallbacks, write error for failures.
    pub detail: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProvisionCounts {
    pub fetched: usize,
    pub fallback_used: usize,
    pub failed: usize,
}

impl fmt::Display for ProvisionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fetched, {} fallback, {} failed",
            self.fetched, self.fallback_used, self.failed
        )
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionReport {
    pub results: Vec<ProvisionResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisionReport {
    pub fn counts(&self) -> ProvisionCounts {
        let mut counts = ProvisionCounts::default();
        for result in &self.results {
            match result.outcome {
                ProvisionOutcome::Fetched => counts.fetched += 1,
                ProvisionOutcome::FallbackUsed => counts.fallback_used += 1,
                ProvisionOutcome::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// True when at least one entry could not be written at all.
    pub fn is_degraded(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.outcome == ProvisionOutcome::Failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProvisionResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == ProvisionOutcome::Failed)
    }

    pub fn summary(&self) -> String {
        let mut line = format!("{} files: {}", self.results.len(), self.counts());
        let failed: Vec<_> = self.failed().map(|r| r.relative_path.as_str()).collect();
        if !failed.is_empty() {
            line.push_str(&format!(" (failed: {})", failed.join(", ")));
        }
        line
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionOptions {
    /// Wall-clock deadline for a single fetch.
    pub fetch_timeout: Duration,
    /// Maximum number of fetches in flight.
    pub jobs: usize,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            jobs: 1,
        }
    }
}

/// Called once per entry, in manifest order, as results become available.
pub type ProgressCallback<'a> = Option<&'a mut dyn FnMut(&ProvisionResult)>;

/// Populate every manifest entry under `install_root`.
///
/// Only a failure to create `install_root` itself is returned as an error;
/// per-entry problems are reported in the [`ProvisionReport`].
pub async fn provision<F, C>(
    manifest: &Manifest,
    install_root: &Path,
    fetcher: &F,
    clock: &C,
    options: &ProvisionOptions,
    mut progress: ProgressCallback<'_>,
) -> Result<ProvisionReport, ProvisionError>
where
    F: Fetcher,
    C: Clock + ?Sized,
{
    storage::prepare_root(install_root, false).await?;
    let started_at = clock.now();
    info!(
        "provision: {} files into {} ({} parallel)",
        manifest.len(),
        install_root.display(),
        options.jobs.max(1)
    );

    let mut pending = stream::iter(manifest.iter())
        .map(|spec| provision_one(spec, install_root, fetcher, options))
        .buffered(options.jobs.max(1));

    let mut results = Vec::with_capacity(manifest.len());
    while let Some(result) = pending.next().await {
        if let Some(callback) = progress.as_deref_mut() {
            callback(&result);
        }
        results.push(result);
    }

    let report = ProvisionReport {
        results,
        started_at,
        finished_at: clock.now(),
    };
    info!("provision: {}", report.summary());
    Ok(report)
}

async fn provision_one<F: Fetcher>(
    spec: &FileSpec,
    install_root: &Path,
    fetcher: &F,
    options: &ProvisionOptions,
) -> ProvisionResult {
    let started = Instant::now();
    let relative_path = spec.display_path();
    let path = spec.destination(install_root);

    let mut result = ProvisionResult {
        relative_path,
        path,
        outcome: ProvisionOutcome::Failed,
        bytes_written: 0,
        sha256: None,
        elapsed: Duration::ZERO,
        detail: None,
    };

    if let Err(err) = storage::ensure_parent_dir(&result.path).await {
        error!("provision: {} failed: {err}", result.relative_path);
        result.detail = Some(err.to_string());
        result.elapsed = started.elapsed();
        return result;
    }

    match fetch_into_place(spec, &result.path, fetcher, options.fetch_timeout).await {
        Ok((bytes, digest)) => {
            info!(
                "provision: fetched {} ({})",
                result.relative_path,
                format_bytes(bytes)
            );
            result.outcome = ProvisionOutcome::Fetched;
            result.bytes_written = bytes;
            result.sha256 = Some(digest);
        }
        Err(fetch_err) => {
            let body = spec.fallback_body();
            match storage::write_atomic(&result.path, &body).await {
                Ok(()) => {
                    warn!(
                        "provision: {} using fallback ({fetch_err})",
                        result.relative_path
                    );
                    result.outcome = ProvisionOutcome::FallbackUsed;
                    result.bytes_written = body.len() as u64;
                    result.sha256 = Some(sha256_hex(&body));
                    result.detail = Some(fetch_err.to_string());
                }
                Err(write_err) => {
                    error!(
                        "provision: {} failed: {write_err} (after {fetch_err})",
                        result.relative_path
                    );
                    result.detail = Some(write_err.to_string());
                }
            }
        }
    }

    result.elapsed = started.elapsed();
    result
}

/// One fetch attempt. The destination is only touched by a final rename.
async fn fetch_into_place<F: Fetcher>(
    spec: &FileSpec,
    dest: &Path,
    fetcher: &F,
    timeout: Duration,
) -> Result<(u64, String), ProvisionError> {
    let staging = storage::staging_path(dest);
    let outcome = fetch_staged(spec.source_url(), &staging, dest, fetcher, timeout).await;
    if outcome.is_err() {
        debug!(
            "provision: discarding staged download for {}",
            spec.display_path()
        );
        storage::discard(&staging).await;
    }
    outcome
}

async fn fetch_staged<F: Fetcher>(
    url: &str,
    staging: &Path,
    dest: &Path,
    fetcher: &F,
    timeout: Duration,
) -> Result<(u64, String), ProvisionError> {
    match tokio::time::timeout(timeout, fetcher.fetch(url, staging, timeout)).await {
        Err(_) => {
            return Err(ProvisionError::network(
                url,
                format!("timed out after {}s", timeout.as_secs_f32()),
            ));
        }
        Ok(fetched) => fetched?,
    };
    let bytes = fs::read(staging)
        .await
        .map_err(|err| ProvisionError::write(staging, err))?;
    storage::promote(staging, dest).await?;
    Ok((bytes.len() as u64, sha256_hex(&bytes)))
}
