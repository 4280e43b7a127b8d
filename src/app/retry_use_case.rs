use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, instrument};

use super::Services;
use crate::error::FailureKind;
use crate::gateway::artifacts::append_extracted;
use crate::gateway::failure_ledger::FailureLedger;
use crate::observability::metrics;
use crate::pipeline::acquisition::{AcquisitionEngine, RunSummary};
use crate::pipeline::ingestion::Extractor;
use crate::pipeline::processing::dedup;
use crate::types::{FailedDownload, MediaCandidate, MediaKind, WorkItem};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryReport {
    pub passes: Vec<RunSummary>,
    pub reextracted_posts: usize,
    pub quarantined: usize,
    pub cancelled: bool,
}

impl RetryReport {
    pub fn resolved(&self) -> usize {
        self.passes.iter().map(|p| p.successful).sum()
    }
}

/// Bounded loop over retry passes. Pass N reads pass N-1's ledger, waits
/// `backoff_multiplier^N` times longer than the original run, and writes its
/// own ledger. Whatever still fails after the last pass is quarantined.
pub struct RetryUseCase {
    services: Services,
}

impl RetryUseCase {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, max_passes: Option<u32>) -> Result<RetryReport> {
        let root = self.services.config.output.root.clone();
        let max_passes = max_passes.unwrap_or(self.services.config.retry.max_retry_passes);
        let mut report = RetryReport::default();

        let Some(mut completed) = FailureLedger::latest_pass(&root) else {
            info!("No failures recorded under {}, nothing to retry", root.display());
            return Ok(report);
        };

        while completed < max_passes {
            let pass = completed + 1;
            let failed_downloads = FailureLedger::load_for_retry(&root, completed)?;
            let failed_posts = FailureLedger::load_extraction_failures(&root, completed)?;
            if failed_downloads.is_empty() && failed_posts.is_empty() {
                info!("Pass {} left nothing to retry", completed);
                return Ok(report);
            }

            let services = self.services.escalated(pass);
            let pacing = &services.config.pacing;
            info!(
                "Retry pass {}/{}: {} downloads, {} posts to re-extract (request delay {}ms, cool-down {}s)",
                pass,
                max_passes,
                failed_downloads.len(),
                failed_posts.len(),
                pacing.request_delay_ms,
                pacing.rate_limit_cooldown_secs
            );

            let mut queue: Vec<WorkItem> = failed_downloads
                .into_iter()
                .map(|failed| failed.item.for_pass(pass))
                .collect();

            if !failed_posts.is_empty() {
                let extractor = Extractor::new(
                    &services.config,
                    services.http.clone(),
                    services.limiter(pacing),
                    services.cancel.clone(),
                );
                let outcome = extractor.run(failed_posts, pass, false).await?;
                if outcome.cancelled {
                    report.cancelled = true;
                    return Ok(report);
                }
                append_extracted(&root, &outcome.state.posts)
                    .context("adding re-extracted posts to the extraction artifacts")?;
                report.reextracted_posts += outcome.state.posts.len();
                queue.extend(outcome.state.work_items());
            }

            let queue = dedup::reduce_by(queue, |item| &item.candidate);
            let engine = AcquisitionEngine::new(
                services.config.clone(),
                services.http.clone(),
                services.limiter(pacing),
                services.cancel.clone(),
            );
            let summary = engine.run(queue, pass, false).await?;
            metrics::retry::resolved(summary.successful);
            let cancelled = summary.cancelled;
            report.passes.push(summary);
            if cancelled {
                report.cancelled = true;
                return Ok(report);
            }

            FailureLedger::open(&root, pass).mark_complete()?;
            completed = pass;
        }

        report.quarantined = quarantine(&root, completed)?;
        Ok(report)
    }
}

/// Move what the final pass could not fix to the permanent-failure file.
/// Items already quarantined are not added twice.
fn quarantine(root: &Path, pass: u32) -> Result<usize> {
    let already: HashSet<String> = FailureLedger::load_quarantined(root)?
        .into_iter()
        .map(|failed| failed.item.url().to_string())
        .collect();

    let mut remaining: Vec<FailedDownload> = FailureLedger::load_for_retry(root, pass)?;
    for post in FailureLedger::load_extraction_failures(root, pass)? {
        let candidate = MediaCandidate::new(post.url.clone(), MediaKind::PlainText);
        let mut item = WorkItem::new(
            post.title.unwrap_or_default(),
            post.subreddit.unwrap_or_default(),
            post.author.unwrap_or_default(),
            candidate,
        );
        item.pass = pass;
        remaining.push(FailedDownload {
            item,
            error: FailureKind::ExtractionFailure(format!("post still not extracted after pass {}", pass)),
        });
    }
    remaining.retain(|failed| !already.contains(failed.item.url()));

    let count = FailureLedger::open(root, pass).quarantine(&remaining)?;
    metrics::retry::quarantined(count);
    Ok(count)
}
