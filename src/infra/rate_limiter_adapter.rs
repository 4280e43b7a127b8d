use crate::app::ports::RateLimiterPort;
use crate::config::PacingConfig;
use crate::pipeline::ingestion::rate_limiter::{Limits, RateLimiter};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RateLimiterAdapter(pub RateLimiter);

impl RateLimiterAdapter {
    /// One shared budget for every worker of a stage.
    pub fn for_pacing(pacing: &PacingConfig) -> Self {
        Self(RateLimiter::new(Limits::per_minute(
            pacing.requests_per_minute,
            pacing.workers,
        )))
    }

    pub fn shared(pacing: &PacingConfig) -> Arc<dyn RateLimiterPort> {
        Arc::new(Self::for_pacing(pacing))
    }
}

#[async_trait]
impl RateLimiterPort for RateLimiterAdapter {
    async fn acquire(&self) {
        self.0.acquire().await;
    }
}
