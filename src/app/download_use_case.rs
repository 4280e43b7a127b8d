use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::info;

use super::Services;
use crate::gateway::artifacts::{default_queue_path, read_queue};
use crate::pipeline::acquisition::{AcquisitionEngine, RunSummary};

/// Download a queue file as the original pass.
pub struct DownloadUseCase {
    services: Services,
}

impl DownloadUseCase {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub async fn execute(&self, list: Option<&Path>, resume: bool) -> Result<RunSummary> {
        let config = &self.services.config;
        let path = match list {
            Some(path) => path.to_path_buf(),
            None => default_queue_path(&config.output.root),
        };
        if !path.exists() {
            bail!(
                "no download queue at {}; run `extract` first or pass --list",
                path.display()
            );
        }
        let queue = read_queue(&path).with_context(|| format!("reading {}", path.display()))?;
        info!("Loaded {} queued items from {}", queue.len(), path.display());

        let engine = AcquisitionEngine::new(
            config.clone(),
            self.services.http.clone(),
            self.services.limiter(&config.pacing),
            self.services.cancel.clone(),
        );
        Ok(engine.run(queue, 0, resume).await?)
    }
}
