use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

#[derive(Clone, Debug, Default)]
pub struct Limits {
    pub requests_per_min: Option<u64>,
    /// Requests that may go out back to back before the bucket throttles.
    pub burst: Option<u64>,
    pub concurrency: Option<u32>,
}

impl Limits {
    pub fn per_minute(requests_per_min: u64, concurrency: usize) -> Self {
        Self {
            requests_per_min: (requests_per_min > 0).then_some(requests_per_min),
            burst: Some(1),
            concurrency: Some(concurrency.max(1) as u32),
        }
    }
}

/// Shared request budget across every worker of a run.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limits: Limits,
    // token bucket modeled by current tokens and time of last refill
    rpm_tokens: Mutex<(f64, Instant)>,
    sem: Option<Semaphore>,
}

impl RateLimiter {
    pub fn new(limits: Limits) -> Self {
        let now = Instant::now();
        let rpm_capacity = limits
            .burst
            .or(limits.requests_per_min)
            .unwrap_or(0)
            .max(1) as f64;
        let sem = limits.concurrency.map(|c| Semaphore::new(c.max(1) as usize));
        Self {
            inner: Arc::new(Inner {
                limits,
                rpm_tokens: Mutex::new((rpm_capacity, now)),
                sem,
            }),
        }
    }

    /// Wait until one more request fits the budget.
    pub async fn acquire(&self) {
        let _permit = match &self.inner.sem {
            Some(sem) => sem.acquire().await.ok(),
            None => None,
        };

        if let Some(rpm) = self.inner.limits.requests_per_min {
            if rpm > 0 {
                self.consume_token(rpm as f64, 60.0).await;
            }
        }
    }

    async fn consume_token(&self, rate_per_period: f64, period_secs: f64) {
        let capacity = self
            .inner
            .limits
            .burst
            .map(|b| b.max(1) as f64)
            .unwrap_or(rate_per_period);
        let refill_rate = rate_per_period / period_secs;
        loop {
            let mut guard = self.inner.rpm_tokens.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *tokens = (*tokens + elapsed * refill_rate).min(capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                break;
            }
            let secs = (1.0 - *tokens) / refill_rate;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_request_waits_for_refill() {
        let limiter = RateLimiter::new(Limits::per_minute(30, 1));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
        limiter.acquire().await;
        // 30 rpm refills one token every two seconds
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1_990), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(2_100), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn default_limits_never_wait() {
        let limiter = RateLimiter::new(Limits::default());
        let start = Instant::now();
        for _ in 0..50 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
