use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::{DOWNLOAD_CHECKPOINT, EXTRACTION_CHECKPOINT, RETRY_DIR};
use crate::gateway::artifacts::{default_queue_path, extracted_counts, read_queue};
use crate::gateway::checkpoint::CheckpointStore;
use crate::gateway::download_log::DownloadLog;
use crate::gateway::failure_ledger::{downloads_path, extraction_path, FailureLedger};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassStatus {
    pub pass: u32,
    pub failed_downloads: usize,
    pub failed_extractions: usize,
    pub resolved: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub root: PathBuf,
    pub extracted_posts: usize,
    pub extracted_urls: usize,
    pub queued: usize,
    pub downloaded: usize,
    pub passes: Vec<PassStatus>,
    pub quarantined: usize,
    pub pending_checkpoints: Vec<String>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Archive: {}", self.root.display())?;
        writeln!(
            f,
            "   Extracted: {} posts, {} URLs",
            self.extracted_posts, self.extracted_urls
        )?;
        writeln!(f, "   Queued (deduplicated): {}", self.queued)?;
        writeln!(f, "   Downloaded: {}", self.downloaded)?;
        for pass in &self.passes {
            writeln!(
                f,
                "   Pass {}: {} failed downloads, {} failed extractions, {} resolved",
                pass.pass, pass.failed_downloads, pass.failed_extractions, pass.resolved
            )?;
        }
        writeln!(f, "   Quarantined: {}", self.quarantined)?;
        if !self.pending_checkpoints.is_empty() {
            writeln!(
                f,
                "   Interrupted stages (use --resume): {}",
                self.pending_checkpoints.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Read-only summary of everything on disk under the output root.
pub struct StatusUseCase;

impl StatusUseCase {
    pub fn execute(root: &Path) -> Result<StatusReport> {
        let (extracted_posts, extracted_urls) = extracted_counts(root)?;
        let queue_path = default_queue_path(root);
        let queued = if queue_path.exists() {
            read_queue(&queue_path)?.len()
        } else {
            0
        };

        let mut passes = Vec::new();
        for pass in known_passes(root) {
            let status = PassStatus {
                pass,
                failed_downloads: FailureLedger::load_for_retry(root, pass)?.len(),
                failed_extractions: FailureLedger::load_extraction_failures(root, pass)?.len(),
                resolved: FailureLedger::load_resolved_count(root, pass)?,
            };
            passes.push(status);
        }

        let pending_checkpoints = [("extract", EXTRACTION_CHECKPOINT), ("download", DOWNLOAD_CHECKPOINT)]
            .into_iter()
            .filter(|(_, file)| CheckpointStore::new(root, file).exists())
            .map(|(stage, _)| stage.to_string())
            .collect();

        Ok(StatusReport {
            root: root.to_path_buf(),
            extracted_posts,
            extracted_urls,
            queued,
            downloaded: DownloadLog::count(root)?,
            passes,
            quarantined: FailureLedger::load_quarantined(root)?.len(),
            pending_checkpoints,
        })
    }
}

/// Pass 0 plus every retry pass directory, in order.
fn known_passes(root: &Path) -> Vec<u32> {
    let mut passes = Vec::new();
    if downloads_path(root, 0).exists() || extraction_path(root, 0).exists() {
        passes.push(0);
    }
    if let Ok(entries) = std::fs::read_dir(root.join(RETRY_DIR)) {
        let mut retry: Vec<u32> = entries
            .flatten()
            .filter_map(|e| {
                e.file_name()
                    .to_string_lossy()
                    .strip_prefix("pass_")
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        retry.sort_unstable();
        passes.extend(retry);
    }
    passes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::pipeline::processing::classify;
    use crate::types::WorkItem;
    use tempfile::tempdir;

    #[test]
    fn empty_archive_reports_zeroes() {
        let dir = tempdir().unwrap();
        let report = StatusUseCase::execute(dir.path()).unwrap();
        assert_eq!(report.downloaded, 0);
        assert!(report.passes.is_empty());
        assert!(report.to_string().contains("Quarantined: 0"));
    }

    #[test]
    fn counts_failures_per_pass() {
        let dir = tempdir().unwrap();
        let item = WorkItem::new("t", "s", "a", classify("https://i.redd.it/a.jpg"));
        let mut zero = FailureLedger::open(dir.path(), 0);
        zero.record(&item, &FailureKind::TransferFailure("HTTP 500".into()));
        zero.flush().unwrap();
        let mut one = FailureLedger::open(dir.path(), 1);
        one.resolve(&item);
        one.flush().unwrap();

        let report = StatusUseCase::execute(dir.path()).unwrap();
        assert_eq!(
            report.passes,
            vec![
                PassStatus { pass: 0, failed_downloads: 1, failed_extractions: 0, resolved: 0 },
                PassStatus { pass: 1, failed_downloads: 0, failed_extractions: 0, resolved: 1 },
            ]
        );
    }
}
