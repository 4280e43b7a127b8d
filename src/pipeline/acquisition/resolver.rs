use super::{failure_for_status, failure_for_transport};
use crate::app::ports::{HttpClientPort, HttpGetResult, RateLimiterPort};
use crate::error::{AttemptFailure, FailureKind};
use crate::pipeline::processing::providers::path_extension;
use crate::types::{MediaCandidate, MediaKind};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct GifResponse {
    gif: GifInfo,
}

#[derive(Debug, Deserialize)]
struct GifInfo {
    urls: GifUrls,
}

#[derive(Debug, Deserialize)]
struct GifUrls {
    hd: Option<String>,
    sd: Option<String>,
}

/// Turns provider page URLs into URLs that serve the media bytes. API calls
/// draw from the same rate limiter as the downloads.
pub struct MediaResolver {
    http: Arc<dyn HttpClientPort>,
    limiter: Arc<dyn RateLimiterPort>,
    redgifs_api: String,
    token: Mutex<Option<String>>,
}

impl MediaResolver {
    pub fn new(http: Arc<dyn HttpClientPort>, limiter: Arc<dyn RateLimiterPort>, redgifs_api: &str) -> Self {
        Self {
            http,
            limiter,
            redgifs_api: redgifs_api.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    async fn api_get(&self, endpoint: &str, headers: &[(&str, &str)]) -> Result<HttpGetResult, AttemptFailure> {
        self.limiter.acquire().await;
        self.http
            .get(endpoint, headers)
            .await
            .map_err(|e| failure_for_transport(&e, endpoint))
    }

    #[instrument(skip(self, candidate), fields(url = %candidate.source_url))]
    pub async fn resolve(&self, candidate: &MediaCandidate) -> Result<String, AttemptFailure> {
        let url = unescape(&candidate.source_url);
        if candidate.kind == MediaKind::RedGifs {
            if let Some(slug) = redgifs_slug(&url) {
                return self.resolve_redgifs(&slug).await;
            }
        }
        Ok(gifv_to_mp4(&url))
    }

    async fn resolve_redgifs(&self, slug: &str) -> Result<String, AttemptFailure> {
        let endpoint = format!("{}/v2/gifs/{}", self.redgifs_api, slug);
        // one retry with a fresh token when the cached one has expired
        for _ in 0..2 {
            let token = self.token().await?;
            let bearer = format!("Bearer {}", token);
            let response = self
                .api_get(&endpoint, &[("Authorization", bearer.as_str())])
                .await?;
            if response.status == 401 {
                debug!("RedGifs token rejected, requesting a new one");
                *self.token.lock().await = None;
                continue;
            }
            if !response.is_success() {
                return Err(failure_for_status(response.status, &endpoint));
            }
            let parsed: GifResponse = serde_json::from_slice(&response.bytes).map_err(|e| {
                AttemptFailure::terminal(FailureKind::TransferFailure(format!(
                    "unexpected RedGifs response for {}: {}",
                    slug, e
                )))
            })?;
            return parsed
                .gif
                .urls
                .hd
                .or(parsed.gif.urls.sd)
                .ok_or_else(|| {
                    AttemptFailure::terminal(FailureKind::TransferFailure(format!(
                        "RedGifs has no media URL for {}",
                        slug
                    )))
                });
        }
        Err(AttemptFailure::transient(FailureKind::TransferFailure(format!(
            "RedGifs rejected a fresh token for {}",
            slug
        ))))
    }

    async fn token(&self) -> Result<String, AttemptFailure> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let endpoint = format!("{}/v2/auth/temporary", self.redgifs_api);
        let response = self.api_get(&endpoint, &[]).await?;
        if !response.is_success() {
            return Err(failure_for_status(response.status, &endpoint));
        }
        let parsed: TokenResponse = serde_json::from_slice(&response.bytes).map_err(|e| {
            AttemptFailure::transient(FailureKind::TransferFailure(format!(
                "unexpected RedGifs token response: {}",
                e
            )))
        })?;
        *cached = Some(parsed.token.clone());
        Ok(parsed.token)
    }
}

pub fn unescape(url: &str) -> String {
    url.trim().replace("&amp;", "&")
}

/// Slug of a RedGifs page URL; `None` for URLs that already point at a file.
pub fn redgifs_slug(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if path_extension(&parsed).is_some() {
        return None;
    }
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_ascii_lowercase())
}

pub fn gifv_to_mp4(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.path().to_ascii_lowercase().ends_with(".gifv") => {
            let path = parsed.path().to_string();
            parsed.set_path(&format!("{}.mp4", &path[..path.len() - ".gifv".len()]));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
