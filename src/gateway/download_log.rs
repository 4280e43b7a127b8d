use crate::constants::DOWNLOADED_FILE;
use crate::error::Result;
use crate::gateway::block_file::{append_blocks, read_blocks, Block};
use crate::types::{DetectedKind, WorkItem};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Append-only record of stored media, flushed together with the checkpoint.
#[derive(Debug)]
pub struct DownloadLog {
    path: PathBuf,
    pending: Vec<Block>,
}

impl DownloadLog {
    pub fn open(root: &Path) -> Self {
        Self {
            path: root.join(DOWNLOADED_FILE),
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, item: &WorkItem, stored: &Path, kind: DetectedKind, bytes: u64) {
        self.pending.push(
            Block::new(item.title.clone())
                .with_meta("subreddit", item.subreddit.clone())
                .with_meta("author", item.author.clone())
                .with_meta("kind", kind.as_str())
                .with_meta("bytes", bytes.to_string())
                .with_meta("path", stored.display().to_string())
                .with_url(item.url()),
        );
    }

    pub fn flush(&mut self) -> Result<()> {
        append_blocks(&self.path, &self.pending)?;
        self.pending.clear();
        Ok(())
    }

    /// URLs that already have a stored file.
    pub fn load_urls(root: &Path) -> Result<HashSet<String>> {
        Ok(read_blocks(&root.join(DOWNLOADED_FILE))?
            .into_iter()
            .flat_map(|block| block.urls)
            .collect())
    }

    pub fn count(root: &Path) -> Result<usize> {
        Ok(read_blocks(&root.join(DOWNLOADED_FILE))?.len())
    }
}
