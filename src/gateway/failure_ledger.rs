//! Durable record of failed posts and media items, one set of files per pass.
//!
//! Pass 0 (the original run) writes `failed_extraction.txt` and
//! `failed_downloads.txt` at the archive root; retry pass N writes the same
//! files under `retry/pass_N/`. A later pass only reads an earlier pass's
//! files, it never edits them. Items that still fail after the last pass are
//! appended to `permanent_failures.txt` and are never retried automatically.

use crate::constants::{
    FAILED_DOWNLOADS_FILE, FAILED_EXTRACTION_FILE, PASS_COMPLETE_MARKER, PERMANENT_FAILURES_FILE,
    RESOLVED_FILE, RETRY_DIR,
};
use crate::error::{FailureKind, Result};
use crate::gateway::artifacts::{work_item_block, work_items_from_block};
use crate::gateway::block_file::{append_blocks, read_blocks, write_blocks_atomic, Block};
use crate::types::{FailedDownload, FailedPost, PostRef, WorkItem};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn pass_dir(root: &Path, pass: u32) -> PathBuf {
    if pass == 0 {
        root.to_path_buf()
    } else {
        root.join(RETRY_DIR).join(format!("pass_{}", pass))
    }
}

pub fn downloads_path(root: &Path, pass: u32) -> PathBuf {
    pass_dir(root, pass).join(FAILED_DOWNLOADS_FILE)
}

pub fn extraction_path(root: &Path, pass: u32) -> PathBuf {
    pass_dir(root, pass).join(FAILED_EXTRACTION_FILE)
}

pub fn permanent_path(root: &Path) -> PathBuf {
    root.join(PERMANENT_FAILURES_FILE)
}

fn error_meta(error: &FailureKind) -> String {
    format!("{}: {}", error.label(), error.detail())
}

fn parse_error_meta(value: Option<&str>) -> FailureKind {
    match value.and_then(|v| v.split_once(':')) {
        Some((label, detail)) => FailureKind::from_ledger(label, detail.trim()),
        None => FailureKind::TransferFailure(value.unwrap_or("unknown").to_string()),
    }
}

fn item_block(item: &WorkItem, error: &FailureKind) -> Block {
    work_item_block(item)
        .with_meta("pass", item.pass.to_string())
        .with_meta("attempts", item.attempt.to_string())
        .with_meta("error", error_meta(error))
        .with_url(item.url())
}

fn post_block(failed: &FailedPost) -> Block {
    Block::new(failed.post.title.clone().unwrap_or_default())
        .with_meta("subreddit", failed.post.subreddit.clone().unwrap_or_default())
        .with_meta("author", failed.post.author.clone().unwrap_or_default())
        .with_meta("error", error_meta(&failed.error))
        .with_url(failed.post.url.clone())
}

fn item_from_block(block: &Block) -> Option<FailedDownload> {
    let mut item = work_items_from_block(block).into_iter().next()?;
    let error = parse_error_meta(block.meta("error"));
    item.pass = block.meta("pass").and_then(|p| p.parse().ok()).unwrap_or(0);
    item.attempt = block.meta("attempts").and_then(|a| a.parse().ok()).unwrap_or(0);
    item.last_error = Some(error.to_string());
    Some(FailedDownload { item, error })
}

fn post_from_block(block: &Block) -> Option<PostRef> {
    let url = block.urls.first()?.clone();
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    Some(PostRef {
        url,
        title: non_empty(&block.title),
        subreddit: block.meta("subreddit").and_then(non_empty),
        author: block.meta("author").and_then(non_empty),
    })
}

/// Buffered writer for one pass. Only the controlling task owns it; entries
/// reach disk on [`FailureLedger::flush`].
#[derive(Debug)]
pub struct FailureLedger {
    root: PathBuf,
    pass: u32,
    pending_downloads: Vec<Block>,
    pending_resolved: Vec<Block>,
}

impl FailureLedger {
    pub fn open(root: &Path, pass: u32) -> Self {
        Self {
            root: root.to_path_buf(),
            pass,
            pending_downloads: Vec::new(),
            pending_resolved: Vec::new(),
        }
    }

    /// Start this pass over: drop whatever an earlier, abandoned attempt at
    /// the same pass wrote.
    pub fn reset_current(&self) -> Result<()> {
        for path in [
            downloads_path(&self.root, self.pass),
            pass_dir(&self.root, self.pass).join(RESOLVED_FILE),
            pass_dir(&self.root, self.pass).join(PASS_COMPLETE_MARKER),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed stale ledger file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn record(&mut self, item: &WorkItem, error: &FailureKind) {
        self.pending_downloads.push(item_block(item, error));
    }

    /// Mark an item from an earlier pass as succeeded in this one.
    pub fn resolve(&mut self, item: &WorkItem) {
        self.pending_resolved.push(
            Block::new(item.title.clone())
                .with_meta("subreddit", item.subreddit.clone())
                .with_meta("pass", self.pass.to_string())
                .with_url(item.url()),
        );
    }

    pub fn flush(&mut self) -> Result<()> {
        append_blocks(&downloads_path(&self.root, self.pass), &self.pending_downloads)?;
        append_blocks(
            &pass_dir(&self.root, self.pass).join(RESOLVED_FILE),
            &self.pending_resolved,
        )?;
        self.pending_downloads.clear();
        self.pending_resolved.clear();
        Ok(())
    }

    /// Mark this pass as finished so later runs build on it.
    pub fn mark_complete(&self) -> Result<()> {
        let dir = pass_dir(&self.root, self.pass);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(PASS_COMPLETE_MARKER), self.pass.to_string())?;
        Ok(())
    }

    /// Rewrite this pass's extraction failures from the extractor's state.
    pub fn write_extraction_failures(&self, failures: &[FailedPost]) -> Result<()> {
        let blocks: Vec<Block> = failures.iter().map(post_block).collect();
        write_blocks_atomic(&extraction_path(&self.root, self.pass), &blocks)?;
        Ok(())
    }

    /// Append items that exhausted every pass to the permanent-failure file.
    pub fn quarantine(&self, failures: &[FailedDownload]) -> Result<usize> {
        let blocks: Vec<Block> = failures
            .iter()
            .map(|failed| {
                let permanent = FailureKind::PermanentFailure(error_meta(&failed.error));
                item_block(&failed.item, &permanent)
            })
            .collect();
        append_blocks(&permanent_path(&self.root), &blocks)?;
        if !blocks.is_empty() {
            info!(
                "Quarantined {} items in {}",
                blocks.len(),
                permanent_path(&self.root).display()
            );
        }
        Ok(blocks.len())
    }

    /// Download failures recorded by `pass`, one per URL, in file order.
    pub fn load_for_retry(root: &Path, pass: u32) -> Result<Vec<FailedDownload>> {
        let blocks = read_blocks(&downloads_path(root, pass))?;
        let mut seen = HashSet::new();
        Ok(blocks
            .iter()
            .filter_map(item_from_block)
            .filter(|failed| seen.insert(failed.item.url().to_string()))
            .collect())
    }

    pub fn load_extraction_failures(root: &Path, pass: u32) -> Result<Vec<PostRef>> {
        let blocks = read_blocks(&extraction_path(root, pass))?;
        let mut seen = HashSet::new();
        Ok(blocks
            .iter()
            .filter_map(post_from_block)
            .filter(|post| seen.insert(post.url.clone()))
            .collect())
    }

    pub fn load_quarantined(root: &Path) -> Result<Vec<FailedDownload>> {
        Ok(read_blocks(&permanent_path(root))?
            .iter()
            .filter_map(item_from_block)
            .collect())
    }

    pub fn load_resolved_count(root: &Path, pass: u32) -> Result<usize> {
        Ok(read_blocks(&pass_dir(root, pass).join(RESOLVED_FILE))?.len())
    }

    /// Highest pass whose ledger is usable: pass 0 once it wrote anything,
    /// retry passes only once they completed.
    pub fn latest_pass(root: &Path) -> Option<u32> {
        let mut latest = None;
        if downloads_path(root, 0).exists() || extraction_path(root, 0).exists() {
            latest = Some(0);
        }
        if let Ok(entries) = fs::read_dir(root.join(RETRY_DIR)) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(pass) = name.strip_prefix("pass_").and_then(|n| n.parse::<u32>().ok()) {
                    if pass_dir(root, pass).join(PASS_COMPLETE_MARKER).exists() {
                        latest = latest.max(Some(pass));
                    }
                }
            }
        }
        latest
    }
}
