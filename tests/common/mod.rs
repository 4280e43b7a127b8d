#![allow(dead_code)]

use async_trait::async_trait;
use media_archiver::app::ports::{HttpClientPort, HttpFailure, HttpGetResult, RateLimiterPort};
use media_archiver::app::{LimiterFactory, Services};
use media_archiver::config::{Config, PacingConfig};
use media_archiver::pipeline::pacing::CancelToken;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type Reply = Result<(u16, String, Vec<u8>), HttpFailure>;

/// Scripted network: replies per URL in order, the last one repeating.
/// Unscripted URLs answer 404.
#[derive(Default)]
pub struct ScriptedHttp {
    replies: Mutex<HashMap<String, Vec<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn reply(&self, url: &str, replies: Vec<Reply>) {
        self.replies.lock().await.insert(url.to_string(), replies);
    }

    pub async fn ok(&self, url: &str, content_type: &str, body: Vec<u8>) {
        self.reply(url, vec![Ok((200, content_type.to_string(), body))]).await;
    }

    pub async fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().await.iter().filter(|u| *u == url).count()
    }

    pub async fn total_calls(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl HttpClientPort for ScriptedHttp {
    async fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<HttpGetResult, HttpFailure> {
        self.calls.lock().await.push(url.to_string());
        let mut replies = self.replies.lock().await;
        let queue = replies.entry(url.to_string()).or_default();
        let reply = if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue
                .first()
                .cloned()
                .unwrap_or_else(|| Ok((404, "text/html".to_string(), Vec::new())))
        };
        reply.map(|(status, content_type, bytes)| HttpGetResult {
            status,
            bytes,
            content_type,
            final_url: url.to_string(),
        })
    }
}

pub struct NoLimit;

#[async_trait]
impl RateLimiterPort for NoLimit {
    async fn acquire(&self) {}
}

/// Fast pacing so paused-clock tests stay short.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default().with_output_root(root);
    config.pacing.request_delay_ms = 100;
    config.pacing.batch_size = 5;
    config.pacing.batch_delay_secs = 1;
    config.pacing.checkpoint_interval = 1;
    config.pacing.rate_limit_cooldown_secs = 5;
    config.pacing.requests_per_minute = 0;
    config.retry.max_attempts_per_item = 2;
    config.retry.max_retry_passes = 2;
    config.retry.transient_backoff_ms = 50;
    config
}

pub fn services(config: Config, http: Arc<ScriptedHttp>) -> Services {
    let limiter_for: LimiterFactory = Arc::new(|_: &PacingConfig| Arc::new(NoLimit) as Arc<dyn RateLimiterPort>);
    Services::new(config, http, limiter_for, CancelToken::never())
}

/// A PNG header followed by binary filler.
pub fn png() -> Vec<u8> {
    let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, 0x49, 0x48, 0x44, 0x52];
    bytes.extend((0..600u32).map(|i| (i % 113) as u8 | 0x80));
    bytes
}

/// An MP4 `ftyp` box followed by binary filler.
pub fn mp4() -> Vec<u8> {
    let mut bytes = vec![0, 0, 0, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0, 0, 2, 0];
    bytes.extend((0..600u32).map(|i| (i % 89) as u8 | 0x80));
    bytes
}

pub fn listing(post: serde_json::Value) -> Vec<u8> {
    serde_json::json!([{"data": {"children": [{"data": post}]}}])
        .to_string()
        .into_bytes()
}
