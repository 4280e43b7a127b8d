//! Use cases wired from ports: each CLI command maps to one of these.

pub mod download_use_case;
pub mod extract_use_case;
pub mod ports;
pub mod retry_use_case;
pub mod status_use_case;

use crate::config::{Config, PacingConfig};
use crate::pipeline::pacing::CancelToken;
use ports::{HttpClientPort, RateLimiterPort};
use std::sync::Arc;

/// Builds the shared request budget for a stage from its (possibly
/// escalated) pacing.
pub type LimiterFactory = Arc<dyn Fn(&PacingConfig) -> Arc<dyn RateLimiterPort> + Send + Sync>;

/// What every stage of a command shares.
#[derive(Clone)]
pub struct Services {
    pub config: Config,
    pub http: Arc<dyn HttpClientPort>,
    pub limiter_for: LimiterFactory,
    pub cancel: CancelToken,
}

impl Services {
    pub fn new(
        config: Config,
        http: Arc<dyn HttpClientPort>,
        limiter_for: LimiterFactory,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            http,
            limiter_for,
            cancel,
        }
    }

    pub fn limiter(&self, pacing: &PacingConfig) -> Arc<dyn RateLimiterPort> {
        (self.limiter_for)(pacing)
    }

    /// Same services with every wait of `pass` stretched by the escalation factor.
    pub fn escalated(&self, pass: u32) -> Self {
        let mut escalated = self.clone();
        let factor = self.config.retry.escalation_factor(pass);
        escalated.config.pacing = self.config.pacing.escalated(factor);
        escalated.config.retry.transient_backoff_ms =
            ((self.config.retry.transient_backoff_ms as f64) * factor).round() as u64;
        escalated
    }
}
