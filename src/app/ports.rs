use async_trait::async_trait;
use std::fmt;

/// Outbound HTTP. Everything that touches the network goes through this so
/// the extraction and acquisition stages can be driven by a scripted client.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpGetResult, HttpFailure>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub final_url: String,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A request that never produced a response
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HttpFailure {
    Timeout,
    Connect(String),
    Other(String),
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpFailure::Timeout => write!(f, "request timed out"),
            HttpFailure::Connect(e) => write!(f, "connection failed: {}", e),
            HttpFailure::Other(e) => write!(f, "request failed: {}", e),
        }
    }
}

#[async_trait]
pub trait RateLimiterPort: Send + Sync {
    async fn acquire(&self);
}
