//! Drives a deduplicated queue through resolve, fetch, sniff and persist.
//!
//! Items are taken strictly in queue order, `workers` at a time, all sharing
//! one rate limiter and one 429 cool-down. Progress (cursor, counters, failures) lives in
//! [`DownloadState`], which is the only thing that reaches disk: the ledger,
//! the success log and the checkpoint are flushed together every
//! `checkpoint_interval` items, so a crash loses at most that many items.

use super::{failure_for_status, failure_for_transport, MediaResolver};
use crate::app::ports::{HttpClientPort, RateLimiterPort};
use crate::config::Config;
use crate::constants::DOWNLOAD_CHECKPOINT;
use crate::error::{AttemptFailure, FailureKind, Result};
use crate::gateway::checkpoint::CheckpointStore;
use crate::gateway::download_log::DownloadLog;
use crate::gateway::failure_ledger::FailureLedger;
use crate::observability::metrics;
use crate::pipeline::pacing::{CancelToken, NextStep, Pacer, RetryPolicy};
use crate::pipeline::processing::sniffer::{extension_for, sniff_with_hints};
use crate::pipeline::storage::media_store::sha256_hex;
use crate::pipeline::storage::MediaStore;
use crate::types::{DetectedKind, DownloadOutcome, FailedDownload, MediaKind, WorkItem};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Everything a download run needs to resume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadState {
    pub pass: u32,
    pub queue_digest: String,
    pub cursor: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub notes: usize,
    pub mismatched: usize,
    pub failed_items: Vec<FailedDownload>,
}

impl DownloadState {
    fn fresh(pass: u32, queue_digest: String) -> Self {
        Self {
            pass,
            queue_digest,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub pass: u32,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub notes: usize,
    pub mismatched: usize,
    pub cancelled: bool,
    pub failed_items: Vec<FailedDownload>,
}

impl RunSummary {
    fn from_state(state: &DownloadState, total: usize, cancelled: bool) -> Self {
        Self {
            pass: state.pass,
            total,
            successful: state.successful,
            failed: state.failed,
            skipped: state.skipped,
            notes: state.notes,
            mismatched: state.mismatched,
            cancelled,
            failed_items: state.failed_items.clone(),
        }
    }
}

/// One attempt's outcome plus what the retry policy needs to know about it.
#[derive(Debug)]
struct AttemptResult {
    outcome: DownloadOutcome,
    retry_in_place: bool,
    note: Option<PathBuf>,
    mismatch: bool,
    secs: f64,
}

impl AttemptResult {
    fn failed(failure: AttemptFailure, declared: MediaKind) -> Self {
        Self {
            outcome: DownloadOutcome::failed(failure.kind, detected_from_declared(declared)),
            retry_in_place: failure.retry_in_place,
            note: None,
            mismatch: false,
            secs: 0.0,
        }
    }
}

fn detected_from_declared(kind: MediaKind) -> DetectedKind {
    match kind {
        MediaKind::DirectImage => DetectedKind::Image,
        MediaKind::DirectGif => DetectedKind::Gif,
        MediaKind::PlainText | MediaKind::Unknown => DetectedKind::Text,
        _ => DetectedKind::Video,
    }
}

#[derive(Debug)]
struct ItemResult {
    item: WorkItem,
    /// `None` when cancellation interrupted the item.
    last: Option<AttemptResult>,
}

pub struct AcquisitionEngine {
    http: Arc<dyn HttpClientPort>,
    limiter: Arc<dyn RateLimiterPort>,
    resolver: MediaResolver,
    store: MediaStore,
    config: Config,
    pacer: Pacer,
    policy: RetryPolicy,
}

impl AcquisitionEngine {
    pub fn new(
        config: Config,
        http: Arc<dyn HttpClientPort>,
        limiter: Arc<dyn RateLimiterPort>,
        cancel: CancelToken,
    ) -> Self {
        let resolver = MediaResolver::new(http.clone(), limiter.clone(), &config.http.redgifs_api);
        Self {
            store: MediaStore::new(config.output.root.clone(), config.output.max_title_len),
            pacer: Pacer::new(config.pacing.clone(), cancel),
            policy: RetryPolicy::new(&config.retry),
            http,
            limiter,
            resolver,
            config,
        }
    }

    fn queue_digest(queue: &[WorkItem], pass: u32) -> String {
        let mut joined = format!("pass={}\n", pass);
        for item in queue {
            joined.push_str(item.url());
            joined.push('\n');
        }
        sha256_hex(joined.as_bytes())
    }

    /// Process `queue` as pass `pass`. With `resume`, a checkpoint for the
    /// same queue and pass picks up where it stopped.
    #[instrument(skip(self, queue), fields(total = queue.len()))]
    pub async fn run(&self, queue: Vec<WorkItem>, pass: u32, resume: bool) -> Result<RunSummary> {
        let root = self.config.output.root.clone();
        let checkpoint = CheckpointStore::new(&root, DOWNLOAD_CHECKPOINT);
        let mut ledger = FailureLedger::open(&root, pass);
        let mut log = DownloadLog::open(&root);
        let digest = Self::queue_digest(&queue, pass);

        let restored = if resume {
            match checkpoint.load::<DownloadState>() {
                Ok(Some(state)) if state.pass == pass && state.queue_digest == digest => {
                    info!(
                        "Resuming pass {} at item {}/{}",
                        pass,
                        state.cursor,
                        queue.len()
                    );
                    Some(state)
                }
                Ok(Some(_)) => {
                    warn!("Download checkpoint belongs to a different queue, starting over");
                    None
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("Could not read download checkpoint, starting over: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let mut state = match restored {
            Some(state) => state,
            None => {
                ledger.reset_current()?;
                DownloadState::fresh(pass, digest)
            }
        };

        let done_urls: HashSet<String> = DownloadLog::load_urls(&root)?;
        let workers = self.config.pacing.workers.max(1);
        let interval = self.config.pacing.checkpoint_interval.max(1);
        let mut cancelled = false;

        info!(
            "Starting pass {} with {} items ({} workers)",
            pass,
            queue.len(),
            workers
        );

        while state.cursor < queue.len() {
            if self.pacer.cancel_token().is_cancelled() {
                cancelled = true;
                break;
            }
            let before = state.cursor;
            let end = (before + workers).min(queue.len());

            let chunk = &queue[before..end];
            let pending: Vec<(usize, WorkItem)> = chunk
                .iter()
                .enumerate()
                .filter(|(_, item)| !done_urls.contains(item.url()))
                .map(|(offset, item)| (offset, item.clone().for_pass(pass)))
                .collect();
            let uses_network = pending
                .iter()
                .any(|(_, item)| item.candidate.kind != MediaKind::PlainText);

            let results = join_all(
                pending
                    .into_iter()
                    .map(|(offset, item)| async move { (offset, self.process_item(item).await) }),
            )
            .await;

            // results are applied in queue order; a cancelled item stops the
            // chunk so the cursor never moves past unfinished work
            let mut results = results.into_iter().peekable();
            let mut completed = 0;
            for (offset, item) in chunk.iter().enumerate() {
                match results.next_if(|(o, _)| *o == offset) {
                    Some((_, result)) => match result.last {
                        Some(last) => self.apply(&mut state, &mut ledger, &mut log, result.item, last),
                        None => {
                            cancelled = true;
                            break;
                        }
                    },
                    None => {
                        state.skipped += 1;
                        debug!("Already downloaded, skipping {}", item.url());
                    }
                }
                completed = offset + 1;
            }
            state.cursor = before + completed;

            if state.cursor / interval > before / interval {
                self.flush(&state, &mut ledger, &mut log, &checkpoint)?;
            }
            if cancelled {
                break;
            }
            if uses_network && state.cursor < queue.len() {
                if self.pacer.after_progress(before, state.cursor).await.is_cancelled() {
                    cancelled = true;
                    break;
                }
            }
        }

        self.flush(&state, &mut ledger, &mut log, &checkpoint)?;
        if cancelled {
            warn!(
                "Pass {} cancelled at item {}/{}; checkpoint kept",
                pass,
                state.cursor,
                queue.len()
            );
        } else {
            checkpoint.clear()?;
        }

        let summary = RunSummary::from_state(&state, queue.len(), cancelled);
        info!(
            "Pass {} finished: {} total, {} successful, {} failed, {} skipped, {} notes, {} mismatched",
            summary.pass,
            summary.total,
            summary.successful,
            summary.failed,
            summary.skipped,
            summary.notes,
            summary.mismatched
        );
        Ok(summary)
    }

    fn flush(
        &self,
        state: &DownloadState,
        ledger: &mut FailureLedger,
        log: &mut DownloadLog,
        checkpoint: &CheckpointStore,
    ) -> Result<()> {
        ledger.flush()?;
        log.flush()?;
        checkpoint.save(state)?;
        metrics::acquisition::checkpoint("download");
        debug!("Download checkpoint at item {}", state.cursor);
        Ok(())
    }

    fn apply(
        &self,
        state: &mut DownloadState,
        ledger: &mut FailureLedger,
        log: &mut DownloadLog,
        item: WorkItem,
        last: AttemptResult,
    ) {
        if last.note.is_some() {
            state.notes += 1;
            metrics::acquisition::note_written();
        }
        if last.mismatch {
            state.mismatched += 1;
            metrics::acquisition::content_mismatch();
        }

        let outcome = last.outcome;
        if outcome.success {
            state.successful += 1;
            if let Some(path) = &outcome.file_path {
                log.record(&item, path, outcome.detected_kind, outcome.byte_size);
                info!(
                    "Stored {} ({} bytes) at {}",
                    item.url(),
                    outcome.byte_size,
                    path.display()
                );
            }
            if item.pass > 0 {
                ledger.resolve(&item);
            }
            metrics::acquisition::download_success(
                outcome.detected_kind.as_str(),
                outcome.byte_size,
                last.secs,
            );
            return;
        }

        let error = outcome
            .error
            .unwrap_or_else(|| FailureKind::TransferFailure("unknown failure".to_string()));
        warn!(
            "Giving up on {} for pass {} after {} attempts: {}",
            item.url(),
            item.pass,
            item.attempt,
            error
        );
        metrics::acquisition::download_error(error.label());
        ledger.record(&item, &error);
        state.failed += 1;
        state.failed_items.push(FailedDownload { item, error });
    }

    /// Attempt one item until it succeeds, the policy gives up, or the run
    /// is cancelled.
    async fn process_item(&self, mut item: WorkItem) -> ItemResult {
        loop {
            item.attempt += 1;
            let Some(result) = self.attempt(&item).await else {
                return ItemResult { item, last: None };
            };
            if result.outcome.success {
                return ItemResult { item, last: Some(result) };
            }

            let failure = AttemptFailure {
                kind: result
                    .outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| FailureKind::TransferFailure("unknown failure".into())),
                retry_in_place: result.retry_in_place,
            };
            item.last_error = Some(failure.kind.to_string());
            debug!(
                "Attempt {} for {} failed: {}",
                item.attempt,
                item.url(),
                failure.kind
            );

            let wait = match self.policy.next_step(&failure, item.attempt) {
                NextStep::GiveUp => return ItemResult { item, last: Some(result) },
                NextStep::CoolDown => self.pacer.cooldown().await,
                NextStep::Backoff(delay) => self.pacer.sleep(delay).await,
            };
            if wait.is_cancelled() {
                return ItemResult { item, last: None };
            }
        }
    }

    /// A single fetch of one item. `None` means cancelled mid-flight.
    async fn attempt(&self, item: &WorkItem) -> Option<AttemptResult> {
        let declared = item.candidate.kind;
        match declared {
            MediaKind::PlainText => return Some(self.store_note(item)),
            MediaKind::Unknown => {
                return Some(AttemptResult::failed(
                    AttemptFailure::terminal(FailureKind::TransferFailure(format!(
                        "unsupported URL: {}",
                        item.url()
                    ))),
                    declared,
                ))
            }
            _ => {}
        }

        if self.pacer.wait_for_cooldown().await.is_cancelled() {
            return None;
        }
        let started = Instant::now();

        // resolution pays for its own API requests
        let url = match self.pacer.guard(self.resolver.resolve(&item.candidate)).await? {
            Ok(url) => url,
            Err(failure) => return Some(AttemptResult::failed(failure, declared)),
        };

        self.pacer.guard(self.limiter.acquire()).await?;
        let response = match self.pacer.guard(self.http.get(&url, &[])).await? {
            Ok(response) => response,
            Err(e) => return Some(AttemptResult::failed(failure_for_transport(&e, &url), declared)),
        };
        if !response.is_success() {
            return Some(AttemptResult::failed(
                failure_for_status(response.status, &url),
                declared,
            ));
        }

        let detected = sniff_with_hints(
            &response.bytes,
            declared,
            Some(&response.content_type),
            Some(&response.final_url),
        );
        let secs = started.elapsed().as_secs_f64();

        if detected == DetectedKind::Text {
            return Some(self.content_mismatch(item, &response.bytes, &url));
        }

        let extension = extension_for(&response.bytes, detected);
        match self.store.persist(item, detected, extension, &response.bytes) {
            Ok(stored) => Some(AttemptResult {
                outcome: DownloadOutcome::stored(stored.path, detected, response.bytes.len() as u64),
                retry_in_place: false,
                note: None,
                mismatch: false,
                secs,
            }),
            Err(e) => {
                error!("Could not store {}: {}", url, e);
                Some(AttemptResult::failed(
                    AttemptFailure::terminal(FailureKind::TransferFailure(format!(
                        "could not store payload: {}",
                        e
                    ))),
                    declared,
                ))
            }
        }
    }

    fn store_note(&self, item: &WorkItem) -> AttemptResult {
        match self.store.write_note(item, None) {
            Ok(stored) => {
                let size = std::fs::metadata(&stored.path).map(|m| m.len()).unwrap_or(0);
                AttemptResult {
                    outcome: DownloadOutcome::stored(stored.path.clone(), DetectedKind::Text, size),
                    retry_in_place: false,
                    note: Some(stored.path),
                    mismatch: false,
                    secs: 0.0,
                }
            }
            Err(e) => AttemptResult::failed(
                AttemptFailure::terminal(FailureKind::TransferFailure(format!(
                    "could not write note: {}",
                    e
                ))),
                MediaKind::PlainText,
            ),
        }
    }

    /// A 2xx that turned out to be text: keep the body as a note and send the
    /// item down the retry path.
    fn content_mismatch(&self, item: &WorkItem, body: &[u8], url: &str) -> AttemptResult {
        let detail = if body.is_empty() {
            format!("empty payload from {}", url)
        } else {
            format!("text payload ({} bytes) from {}", body.len(), url)
        };
        warn!("Content mismatch for {}: {}", item.url(), detail);

        let note = if self.config.output.keep_mismatch_notes && !body.is_empty() {
            match self.store.write_note(item, Some(body)) {
                Ok(stored) => Some(stored.path),
                Err(e) => {
                    error!("Could not keep mismatch note for {}: {}", item.url(), e);
                    None
                }
            }
        } else {
            None
        };

        AttemptResult {
            outcome: DownloadOutcome::failed(FailureKind::ContentMismatch(detail), DetectedKind::Text),
            retry_in_place: false,
            note,
            mismatch: true,
            secs: 0.0,
        }
    }
}
