//! Run metrics for the archiver.
//!
//! Recording goes through the `metrics` facade; a Prometheus recorder is
//! installed by [`init`] and its text rendering is written next to the archive
//! by [`write_snapshot`] when a command finishes. Without a recorder every
//! helper is a no-op, which is what the tests rely on.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// All metric names used by the archiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Extraction
    ExtractionPostsSuccess,
    ExtractionPostsError,
    ExtractionCandidates,
    ExtractionDuplicatesRemoved,

    // Acquisition
    DownloadsSuccess,
    DownloadsError,
    DownloadBytes,
    DownloadDuration,
    ContentMismatches,
    NotesWritten,
    RateLimitCooldowns,
    BatchPauses,
    Checkpoints,

    // Retry passes
    RetryResolved,
    RetryQuarantined,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ExtractionPostsSuccess => "archiver_extraction_posts_success_total",
            MetricName::ExtractionPostsError => "archiver_extraction_posts_error_total",
            MetricName::ExtractionCandidates => "archiver_extraction_candidates_total",
            MetricName::ExtractionDuplicatesRemoved => "archiver_extraction_duplicates_removed_total",

            MetricName::DownloadsSuccess => "archiver_downloads_success_total",
            MetricName::DownloadsError => "archiver_downloads_error_total",
            MetricName::DownloadBytes => "archiver_download_bytes",
            MetricName::DownloadDuration => "archiver_download_duration_seconds",
            MetricName::ContentMismatches => "archiver_content_mismatches_total",
            MetricName::NotesWritten => "archiver_notes_written_total",
            MetricName::RateLimitCooldowns => "archiver_rate_limit_cooldowns_total",
            MetricName::BatchPauses => "archiver_batch_pauses_total",
            MetricName::Checkpoints => "archiver_checkpoints_total",

            MetricName::RetryResolved => "archiver_retry_resolved_total",
            MetricName::RetryQuarantined => "archiver_retry_quarantined_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            ExtractionPostsSuccess,
            ExtractionPostsError,
            ExtractionCandidates,
            ExtractionDuplicatesRemoved,
            DownloadsSuccess,
            DownloadsError,
            DownloadBytes,
            DownloadDuration,
            ContentMismatches,
            NotesWritten,
            RateLimitCooldowns,
            BatchPauses,
            Checkpoints,
            RetryResolved,
            RetryQuarantined,
        ]
        .into_iter()
    }

    pub fn description(&self) -> &'static str {
        match self {
            MetricName::ExtractionPostsSuccess => "Posts whose media candidates were extracted",
            MetricName::ExtractionPostsError => "Posts that failed extraction",
            MetricName::ExtractionCandidates => "Media candidates discovered before deduplication",
            MetricName::ExtractionDuplicatesRemoved => "Candidates dropped as duplicates",
            MetricName::DownloadsSuccess => "Media items stored in the archive",
            MetricName::DownloadsError => "Media items that failed for the pass",
            MetricName::DownloadBytes => "Size of stored payloads",
            MetricName::DownloadDuration => "Time spent fetching one payload",
            MetricName::ContentMismatches => "Payloads that were text where media was expected",
            MetricName::NotesWritten => "Text payloads kept as notes",
            MetricName::RateLimitCooldowns => "Cool-downs taken after a 429",
            MetricName::BatchPauses => "Pauses taken at batch boundaries",
            MetricName::Checkpoints => "Checkpoints flushed to disk",
            MetricName::RetryResolved => "Items that succeeded on a retry pass",
            MetricName::RetryQuarantined => "Items moved to permanent failures",
        }
    }

    fn is_histogram(&self) -> bool {
        matches!(self, MetricName::DownloadBytes | MetricName::DownloadDuration)
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe every metric.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();

    for metric in MetricName::all_metrics() {
        if metric.is_histogram() {
            ::metrics::describe_histogram!(metric.as_str(), metric.description());
        } else {
            ::metrics::describe_counter!(metric.as_str(), metric.description());
        }
    }

    info!("Metrics recorder installed");
    Ok(())
}

/// Render the current metrics to `path`. Returns false when no recorder is installed.
pub fn write_snapshot(path: &Path) -> std::io::Result<bool> {
    let Some(handle) = METRICS_HANDLE.get() else {
        return Ok(false);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, handle.render())?;
    debug!("Wrote metrics snapshot to {}", path.display());
    Ok(true)
}

// ============================================================================
// Extraction Metrics
// ============================================================================

pub mod extraction {
    use super::MetricName;

    pub fn post_success(candidates: usize) {
        ::metrics::counter!(MetricName::ExtractionPostsSuccess.as_str()).increment(1);
        ::metrics::counter!(MetricName::ExtractionCandidates.as_str()).increment(candidates as u64);
    }

    pub fn post_error() {
        ::metrics::counter!(MetricName::ExtractionPostsError.as_str()).increment(1);
    }

    pub fn duplicates_removed(count: usize) {
        ::metrics::counter!(MetricName::ExtractionDuplicatesRemoved.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Acquisition Metrics
// ============================================================================

pub mod acquisition {
    use super::MetricName;

    pub fn download_success(kind: &'static str, bytes: u64, secs: f64) {
        ::metrics::counter!(MetricName::DownloadsSuccess.as_str(), "kind" => kind).increment(1);
        ::metrics::histogram!(MetricName::DownloadBytes.as_str()).record(bytes as f64);
        ::metrics::histogram!(MetricName::DownloadDuration.as_str()).record(secs);
    }

    pub fn download_error(reason: &'static str) {
        ::metrics::counter!(MetricName::DownloadsError.as_str(), "reason" => reason).increment(1);
    }

    pub fn content_mismatch() {
        ::metrics::counter!(MetricName::ContentMismatches.as_str()).increment(1);
    }

    pub fn note_written() {
        ::metrics::counter!(MetricName::NotesWritten.as_str()).increment(1);
    }

    pub fn rate_limit_cooldown() {
        ::metrics::counter!(MetricName::RateLimitCooldowns.as_str()).increment(1);
    }

    pub fn batch_pause() {
        ::metrics::counter!(MetricName::BatchPauses.as_str()).increment(1);
    }

    pub fn checkpoint(stage: &'static str) {
        ::metrics::counter!(MetricName::Checkpoints.as_str(), "stage" => stage).increment(1);
    }
}

// ============================================================================
// Retry Metrics
// ============================================================================

pub mod retry {
    use super::MetricName;

    pub fn resolved(count: usize) {
        ::metrics::counter!(MetricName::RetryResolved.as_str()).increment(count as u64);
    }

    pub fn quarantined(count: usize) {
        ::metrics::counter!(MetricName::RetryQuarantined.as_str()).increment(count as u64);
    }
}
