use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use super::Services;
use crate::gateway::artifacts::write_queue;
use crate::observability::metrics;
use crate::pipeline::ingestion::{load_post_refs, Extractor};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractReport {
    pub total_posts: usize,
    pub extracted_posts: usize,
    pub failed_posts: usize,
    pub candidates: usize,
    pub queued: usize,
    pub cancelled: bool,
}

/// Read the input directory, extract every post and write the
/// deduplicated download queue.
pub struct ExtractUseCase {
    services: Services,
}

impl ExtractUseCase {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub async fn execute(&self, input_dir: &Path, resume: bool) -> Result<ExtractReport> {
        let posts = load_post_refs(input_dir)
            .with_context(|| format!("reading input directory {}", input_dir.display()))?;
        info!("Loaded {} post references from {}", posts.len(), input_dir.display());

        let config = &self.services.config;
        let extractor = Extractor::new(
            config,
            self.services.http.clone(),
            self.services.limiter(&config.pacing),
            self.services.cancel.clone(),
        );
        let outcome = extractor.run(posts, 0, resume).await?;

        let candidates = outcome.state.candidate_count();
        let mut report = ExtractReport {
            total_posts: outcome.total,
            extracted_posts: outcome.state.posts.len(),
            failed_posts: outcome.state.failures.len(),
            candidates,
            queued: 0,
            cancelled: outcome.cancelled,
        };
        if outcome.cancelled {
            return Ok(report);
        }

        let queue = outcome.state.work_items();
        metrics::extraction::duplicates_removed(candidates - queue.len());
        write_queue(&config.output.root, &queue).context("writing the download queue")?;
        info!(
            "Queued {} unique items out of {} candidates",
            queue.len(),
            candidates
        );
        report.queued = queue.len();
        Ok(report)
    }
}
