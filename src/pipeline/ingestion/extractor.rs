//! Stage 1: turn post references into media candidates.
//!
//! Reddit permalinks are fetched as JSON under the same pacing, rate limit
//! and per-item retry policy as downloads; anything else is classified
//! directly. State is checkpointed every `checkpoint_interval` posts, and
//! each checkpoint also rewrites `all_extracted.txt` and the pass's
//! `failed_extraction.txt` so the artifacts always match the saved state.

use super::reddit::{
    extract_post_media, is_reddit_post, json_endpoint, post_field, post_object,
    provenance_from_permalink,
};
use crate::app::ports::{HttpClientPort, RateLimiterPort};
use crate::config::Config;
use crate::constants::EXTRACTION_CHECKPOINT;
use crate::error::{AttemptFailure, FailureKind, Result};
use crate::gateway::artifacts::write_all_extracted;
use crate::gateway::checkpoint::CheckpointStore;
use crate::gateway::failure_ledger::FailureLedger;
use crate::observability::metrics;
use crate::pipeline::pacing::{CancelToken, NextStep, Pacer, RetryPolicy};
use crate::pipeline::processing::{classify, dedup};
use crate::pipeline::storage::media_store::sha256_hex;
use crate::types::{ExtractedPost, FailedPost, MediaKind, PostRef, WorkItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionState {
    pub pass: u32,
    pub input_digest: String,
    pub cursor: usize,
    pub posts: Vec<ExtractedPost>,
    pub failures: Vec<FailedPost>,
}

impl ExtractionState {
    pub fn candidate_count(&self) -> usize {
        self.posts.iter().map(|p| p.candidates.len()).sum()
    }

    /// All candidates as work items, deduplicated across the whole run.
    pub fn work_items(&self) -> Vec<WorkItem> {
        let items: Vec<WorkItem> = self.posts.iter().flat_map(|p| p.work_items()).collect();
        dedup::reduce_by(items, |item| &item.candidate)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub state: ExtractionState,
    pub total: usize,
    pub cancelled: bool,
}

pub struct Extractor {
    http: Arc<dyn HttpClientPort>,
    limiter: Arc<dyn RateLimiterPort>,
    root: PathBuf,
    interval: usize,
    pacer: Pacer,
    policy: RetryPolicy,
}

/// Checkpoint file for one extraction pass; re-extraction in retry passes
/// keeps its own.
pub fn checkpoint_name(pass: u32) -> String {
    if pass == 0 {
        EXTRACTION_CHECKPOINT.to_string()
    } else {
        format!("extraction_pass_{}.json", pass)
    }
}

fn failure_for_status(status: u16, url: &str) -> AttemptFailure {
    let detail = format!("HTTP {} for {}", status, url);
    match status {
        429 => AttemptFailure::rate_limited(detail),
        408 | 500..=599 => AttemptFailure::transient(FailureKind::ExtractionFailure(detail)),
        _ => AttemptFailure::terminal(FailureKind::ExtractionFailure(detail)),
    }
}

impl Extractor {
    pub fn new(
        config: &Config,
        http: Arc<dyn HttpClientPort>,
        limiter: Arc<dyn RateLimiterPort>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            http,
            limiter,
            root: config.output.root.clone(),
            interval: config.pacing.checkpoint_interval.max(1),
            pacer: Pacer::new(config.pacing.clone(), cancel),
            policy: RetryPolicy::new(&config.retry),
        }
    }

    fn input_digest(posts: &[PostRef], pass: u32) -> String {
        let mut joined = format!("pass={}\n", pass);
        for post in posts {
            joined.push_str(&post.url);
            joined.push('\n');
        }
        sha256_hex(joined.as_bytes())
    }

    #[instrument(skip(self, posts), fields(total = posts.len()))]
    pub async fn run(&self, posts: Vec<PostRef>, pass: u32, resume: bool) -> Result<ExtractionOutcome> {
        let checkpoint = CheckpointStore::new(&self.root, &checkpoint_name(pass));
        let ledger = FailureLedger::open(&self.root, pass);
        let digest = Self::input_digest(&posts, pass);

        let restored = if resume {
            match checkpoint.load::<ExtractionState>() {
                Ok(Some(state)) if state.input_digest == digest => {
                    info!(
                        "Resuming extraction at post {}/{}",
                        state.cursor,
                        posts.len()
                    );
                    Some(state)
                }
                Ok(Some(_)) => {
                    warn!("Extraction checkpoint belongs to different input, starting over");
                    None
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("Could not read extraction checkpoint, starting over: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let mut state = restored.unwrap_or_else(|| ExtractionState {
            pass,
            input_digest: digest,
            ..Default::default()
        });

        let mut cancelled = false;
        while state.cursor < posts.len() {
            if self.pacer.cancel_token().is_cancelled() {
                cancelled = true;
                break;
            }
            let before = state.cursor;
            let post = &posts[before];
            let fetches = is_reddit_post(&post.url);

            match self.extract_with_retry(post).await {
                Some(Ok(extracted)) => {
                    debug!(
                        "{} candidates from {}",
                        extracted.candidates.len(),
                        post.url
                    );
                    metrics::extraction::post_success(extracted.candidates.len());
                    state.posts.push(extracted);
                }
                Some(Err(error)) => {
                    warn!("Extraction failed for {}: {}", post.url, error);
                    metrics::extraction::post_error();
                    state.failures.push(FailedPost {
                        post: post.clone(),
                        error,
                    });
                }
                None => {
                    cancelled = true;
                    break;
                }
            }
            state.cursor = before + 1;

            if state.cursor % self.interval == 0 {
                self.flush(&state, &ledger, &checkpoint)?;
            }
            if fetches
                && state.cursor < posts.len()
                && self.pacer.after_progress(before, state.cursor).await.is_cancelled()
            {
                cancelled = true;
                break;
            }
        }

        self.flush(&state, &ledger, &checkpoint)?;
        if cancelled {
            warn!(
                "Extraction cancelled at post {}/{}; checkpoint kept",
                state.cursor,
                posts.len()
            );
        } else {
            checkpoint.clear()?;
        }
        info!(
            "Extraction pass {} finished: {} posts, {} candidates, {} failed",
            pass,
            state.posts.len(),
            state.candidate_count(),
            state.failures.len()
        );
        Ok(ExtractionOutcome {
            state,
            total: posts.len(),
            cancelled,
        })
    }

    fn flush(
        &self,
        state: &ExtractionState,
        ledger: &FailureLedger,
        checkpoint: &CheckpointStore,
    ) -> Result<()> {
        if state.pass == 0 {
            write_all_extracted(&self.root, &state.posts)?;
        }
        ledger.write_extraction_failures(&state.failures)?;
        checkpoint.save(state)?;
        metrics::acquisition::checkpoint("extraction");
        debug!("Extraction checkpoint at post {}", state.cursor);
        Ok(())
    }

    /// `None` when cancelled.
    async fn extract_with_retry(
        &self,
        post: &PostRef,
    ) -> Option<std::result::Result<ExtractedPost, FailureKind>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self.extract_post(post).await? {
                Ok(extracted) => return Some(Ok(extracted)),
                Err(failure) => failure,
            };
            let wait = match self.policy.next_step(&failure, attempt) {
                NextStep::GiveUp => return Some(Err(failure.kind)),
                NextStep::CoolDown => self.pacer.cooldown().await,
                NextStep::Backoff(delay) => self.pacer.sleep(delay).await,
            };
            if wait.is_cancelled() {
                return None;
            }
        }
    }

    /// One attempt at one post. `None` when cancelled mid-request.
    pub async fn extract_post(
        &self,
        post: &PostRef,
    ) -> Option<std::result::Result<ExtractedPost, AttemptFailure>> {
        if !is_reddit_post(&post.url) {
            return Some(Self::direct(post));
        }
        let Some(endpoint) = json_endpoint(&post.url) else {
            return Some(Err(AttemptFailure::terminal(FailureKind::ExtractionFailure(
                format!("not a post URL: {}", post.url),
            ))));
        };

        self.pacer.guard(self.limiter.acquire()).await?;
        let response = match self.pacer.guard(self.http.get(&endpoint, &[])).await? {
            Ok(response) => response,
            Err(e) => {
                return Some(Err(AttemptFailure::transient(FailureKind::ExtractionFailure(
                    format!("{} ({})", e, endpoint),
                ))))
            }
        };
        if !response.is_success() {
            return Some(Err(failure_for_status(response.status, &endpoint)));
        }

        let listing: Value = match serde_json::from_slice(&response.bytes) {
            Ok(listing) => listing,
            Err(e) => {
                return Some(Err(AttemptFailure::terminal(FailureKind::ExtractionFailure(
                    format!("unreadable post JSON from {}: {}", endpoint, e),
                ))))
            }
        };
        let Some(data) = post_object(&listing) else {
            return Some(Err(AttemptFailure::terminal(FailureKind::ExtractionFailure(
                format!("no post object in {}", endpoint),
            ))));
        };

        let candidates = extract_post_media(data, &post.url);
        if candidates.is_empty() {
            return Some(Err(AttemptFailure::terminal(FailureKind::ExtractionFailure(
                format!("no media found in {}", post.url),
            ))));
        }

        let (slug_subreddit, slug_title) = provenance_from_permalink(&post.url);
        Some(Ok(ExtractedPost {
            post_url: post.url.clone(),
            title: post
                .title
                .clone()
                .or_else(|| post_field(data, "title"))
                .or(slug_title)
                .unwrap_or_default(),
            subreddit: post
                .subreddit
                .clone()
                .or_else(|| post_field(data, "subreddit"))
                .or(slug_subreddit)
                .unwrap_or_default(),
            author: post
                .author
                .clone()
                .or_else(|| post_field(data, "author"))
                .unwrap_or_default(),
            candidates,
        }))
    }

    /// Rows that are not Reddit permalinks are classified as they are.
    fn direct(post: &PostRef) -> std::result::Result<ExtractedPost, AttemptFailure> {
        let candidate = classify(&post.url);
        if candidate.kind == MediaKind::Unknown {
            return Err(AttemptFailure::terminal(FailureKind::ExtractionFailure(
                format!("not a URL: {}", post.url),
            )));
        }
        Ok(ExtractedPost {
            post_url: post.url.clone(),
            title: post.title.clone().unwrap_or_default(),
            subreddit: post.subreddit.clone().unwrap_or_default(),
            author: post.author.clone().unwrap_or_default(),
            candidates: vec![candidate],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{HttpFailure, HttpGetResult};
    use crate::constants::ALL_EXTRACTED_FILE;
    use crate::pipeline::pacing::CancelHandle;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct JsonHttp {
        bodies: Mutex<HashMap<String, Vec<(u16, String)>>>,
        calls: Mutex<Vec<String>>,
    }

    impl JsonHttp {
        async fn script(&self, endpoint: &str, replies: Vec<(u16, String)>) {
            self.bodies.lock().await.insert(endpoint.to_string(), replies);
        }
    }

    #[async_trait]
    impl HttpClientPort for JsonHttp {
        async fn get(&self, url: &str, _headers: &[(&str, &str)]) -> std::result::Result<HttpGetResult, HttpFailure> {
            self.calls.lock().await.push(url.to_string());
            let mut bodies = self.bodies.lock().await;
            let replies = bodies.entry(url.to_string()).or_default();
            let (status, body) = if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies.first().cloned().unwrap_or((404, String::new()))
            };
            Ok(HttpGetResult {
                status,
                bytes: body.into_bytes(),
                content_type: "application/json".into(),
                final_url: url.to_string(),
            })
        }
    }

    struct NoLimit;

    #[async_trait]
    impl RateLimiterPort for NoLimit {
        async fn acquire(&self) {}
    }

    fn listing(post: Value) -> String {
        serde_json::json!([{"data": {"children": [{"data": post}]}}]).to_string()
    }

    fn config(root: &std::path::Path) -> Config {
        let mut config = Config::default().with_output_root(root);
        config.pacing.request_delay_ms = 1_000;
        config.pacing.batch_size = 10;
        config.pacing.checkpoint_interval = 1;
        config.pacing.rate_limit_cooldown_secs = 60;
        config.retry.transient_backoff_ms = 100;
        config
    }

    fn permalink(id: &str) -> String {
        format!("https://www.reddit.com/r/pics/comments/{}/post_{}/", id, id)
    }

    fn endpoint(id: &str) -> String {
        format!("https://www.reddit.com/r/pics/comments/{}/post_{}.json?raw_json=1", id, id)
    }

    #[tokio::test(start_paused = true)]
    async fn fills_provenance_and_records_failures() {
        let dir = tempdir().unwrap();
        let http = Arc::new(JsonHttp::default());
        http.script(
            &endpoint("a"),
            vec![(200, listing(serde_json::json!({
                "title": "From JSON", "author": "poster", "subreddit": "pics",
                "url": "https://i.redd.it/a.jpg"
            })))],
        )
        .await;
        http.script(&endpoint("b"), vec![(404, String::new())]).await;

        let posts = vec![
            PostRef::new(permalink("a")),
            PostRef::new(permalink("b")),
            PostRef::new("https://example.com/article"),
        ];
        let extractor = Extractor::new(&config(dir.path()), http.clone(), Arc::new(NoLimit), CancelToken::never());
        let outcome = extractor.run(posts, 0, false).await.unwrap();

        assert!(!outcome.cancelled);
        assert_eq!(outcome.state.posts.len(), 2);
        assert_eq!(outcome.state.posts[0].title, "From JSON");
        assert_eq!(outcome.state.posts[0].author, "poster");
        assert_eq!(outcome.state.posts[1].candidates[0].kind, MediaKind::PlainText);
        assert_eq!(outcome.state.failures.len(), 1);
        assert_eq!(outcome.state.failures[0].error.label(), "extraction_failure");

        let failed = FailureLedger::load_extraction_failures(dir.path(), 0).unwrap();
        assert_eq!(failed[0].url, permalink("b"));
        assert!(dir.path().join(ALL_EXTRACTED_FILE).exists());
        assert!(!dir.path().join(".checkpoint").join(EXTRACTION_CHECKPOINT).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_post_is_retried_after_cooldown() {
        let dir = tempdir().unwrap();
        let http = Arc::new(JsonHttp::default());
        http.script(
            &endpoint("a"),
            vec![
                (429, String::new()),
                (200, listing(serde_json::json!({"url": "https://i.redd.it/a.jpg"}))),
            ],
        )
        .await;

        let start = tokio::time::Instant::now();
        let extractor = Extractor::new(&config(dir.path()), http.clone(), Arc::new(NoLimit), CancelToken::never());
        let outcome = extractor.run(vec![PostRef::new(permalink("a"))], 0, false).await.unwrap();
        assert_eq!(outcome.state.posts.len(), 1);
        // slug fills the missing title
        assert_eq!(outcome.state.posts[0].title, "post a");
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(http.calls.lock().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_extraction_resumes_to_the_same_result() {
        let dir = tempdir().unwrap();
        let http = Arc::new(JsonHttp::default());
        for id in ["a", "b", "c"] {
            http.script(
                &endpoint(id),
                vec![(200, listing(serde_json::json!({"url": format!("https://i.redd.it/{}.jpg", id)})))],
            )
            .await;
        }
        let posts: Vec<PostRef> = ["a", "b", "c"].iter().map(|id| PostRef::new(permalink(id))).collect();

        let uninterrupted = Extractor::new(&config(dir.path()), http.clone(), Arc::new(NoLimit), CancelToken::never())
            .run(posts.clone(), 0, false)
            .await
            .unwrap();

        let other = tempdir().unwrap();
        let (handle, token) = CancelHandle::new();
        let first = Extractor::new(&config(other.path()), http.clone(), Arc::new(NoLimit), token);
        let run = tokio::spawn({
            let posts = posts.clone();
            async move { first.run(posts, 0, false).await }
        });
        // post a is done, the extractor is in its 1s request delay
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel();
        let partial = run.await.unwrap().unwrap();
        assert!(partial.cancelled);
        assert_eq!(partial.state.cursor, 1);

        let resumed = Extractor::new(&config(other.path()), http.clone(), Arc::new(NoLimit), CancelToken::never())
            .run(posts, 0, true)
            .await
            .unwrap();
        assert_eq!(resumed.state.posts, uninterrupted.state.posts);
        assert_eq!(
            std::fs::read_to_string(other.path().join(ALL_EXTRACTED_FILE)).unwrap(),
            std::fs::read_to_string(dir.path().join(ALL_EXTRACTED_FILE)).unwrap()
        );
    }

    #[test]
    fn work_items_are_deduplicated_across_posts() {
        let post = |url: &str| ExtractedPost {
            post_url: url.into(),
            title: "t".into(),
            subreddit: "s".into(),
            author: "a".into(),
            candidates: vec![
                classify("https://v.redd.it/abc/DASH_240.mp4"),
                classify("https://v.redd.it/abc/DASH_720.mp4"),
            ],
        };
        let state = ExtractionState {
            posts: vec![post("p1"), post("p2")],
            ..Default::default()
        };
        let items = state.work_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url(), "https://v.redd.it/abc/DASH_720.mp4");
    }
}
