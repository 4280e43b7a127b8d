//! Cancellable waits and the per-item retry policy shared by extraction and
//! acquisition.

use crate::config::{PacingConfig, RetryConfig};
use crate::error::AttemptFailure;
use crate::observability::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Owner side of a cancellation signal. Dropping it does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_, token) = CancelHandle::new();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Completed,
    Cancelled,
}

impl Wait {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Wait::Cancelled)
    }
}

/// Two-tier pacing: a short gap after every item and a long pause every batch.
/// A 429 cool-down is shared: clones of one pacer all hold off until it ends.
#[derive(Debug, Clone)]
pub struct Pacer {
    pacing: PacingConfig,
    cancel: CancelToken,
    cooling_until: Arc<Mutex<Option<Instant>>>,
}

impl Pacer {
    pub fn new(pacing: PacingConfig, cancel: CancelToken) -> Self {
        Self {
            pacing,
            cancel,
            cooling_until: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub async fn sleep(&self, duration: Duration) -> Wait {
        if self.cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        if duration.is_zero() {
            return Wait::Completed;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Wait::Completed,
            _ = self.cancel.cancelled() => Wait::Cancelled,
        }
    }

    async fn sleep_until(&self, deadline: Instant) -> Wait {
        if self.cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => Wait::Completed,
            _ = self.cancel.cancelled() => Wait::Cancelled,
        }
    }

    /// Run `fut` unless cancellation arrives first.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            out = fut => Some(out),
            _ = self.cancel.cancelled() => None,
        }
    }

    /// Pace after progress moved from `before` to `after` processed items.
    pub async fn after_progress(&self, before: usize, after: usize) -> Wait {
        let batch = self.pacing.batch_size.max(1);
        if after / batch > before / batch {
            info!(
                "Processed {} items, pausing {}s before the next batch",
                after, self.pacing.batch_delay_secs
            );
            metrics::acquisition::batch_pause();
            self.sleep(self.pacing.batch_delay()).await
        } else {
            self.sleep(self.pacing.request_delay()).await
        }
    }

    /// Start (or extend) the shared cool-down and wait it out.
    pub async fn cooldown(&self) -> Wait {
        let until = Instant::now() + self.pacing.cooldown();
        {
            let mut cooling = self.cooling_until.lock().await;
            if cooling.map_or(true, |current| current < until) {
                *cooling = Some(until);
            }
        }
        warn!(
            "Rate limited, cooling down for {}s",
            self.pacing.rate_limit_cooldown_secs
        );
        metrics::acquisition::rate_limit_cooldown();
        self.wait_for_cooldown().await
    }

    /// Hold off while a cool-down started by any worker is running.
    pub async fn wait_for_cooldown(&self) -> Wait {
        loop {
            let until = *self.cooling_until.lock().await;
            match until {
                Some(until) if until > Instant::now() => {
                    if self.sleep_until(until).await.is_cancelled() {
                        return Wait::Cancelled;
                    }
                }
                _ => return Wait::Completed,
            }
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    CoolDown,
    Backoff(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    transient_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retry: &RetryConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts_per_item.max(1),
            transient_backoff: Duration::from_millis(retry.transient_backoff_ms),
        }
    }

    /// `attempt` is the number of attempts already made, starting at 1.
    pub fn next_step(&self, failure: &AttemptFailure, attempt: u32) -> NextStep {
        if !failure.retry_in_place || attempt >= self.max_attempts {
            debug!("No retry in place after attempt {}: {}", attempt, failure.kind);
            return NextStep::GiveUp;
        }
        if failure.is_rate_limited() {
            NextStep::CoolDown
        } else {
            // linear backoff
            NextStep::Backoff(self.transient_backoff * attempt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tokio::time::Instant;

    fn pacing() -> PacingConfig {
        PacingConfig {
            request_delay_ms: 1_000,
            batch_size: 3,
            batch_delay_secs: 30,
            checkpoint_interval: 1,
            rate_limit_cooldown_secs: 120,
            requests_per_minute: 0,
            workers: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_boundary_takes_the_long_pause() {
        let pacer = Pacer::new(pacing(), CancelToken::never());
        let start = Instant::now();
        assert_eq!(pacer.after_progress(0, 1).await, Wait::Completed);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        let start = Instant::now();
        pacer.after_progress(2, 3).await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_a_cooldown() {
        let (handle, token) = CancelHandle::new();
        let pacer = Pacer::new(pacing(), token);
        let start = Instant::now();
        let wait = tokio::spawn(async move { pacer.cooldown().await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.cancel();
        assert_eq!(wait.await.unwrap(), Wait::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn never_token_lets_waits_complete() {
        let pacer = Pacer::new(pacing(), CancelToken::never());
        assert_eq!(pacer.cooldown().await, Wait::Completed);
        assert_eq!(pacer.guard(async { 7 }).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_holds_back_every_clone() {
        let pacer = Pacer::new(pacing(), CancelToken::never());
        let other = pacer.clone();
        let start = Instant::now();
        assert_eq!(other.wait_for_cooldown().await, Wait::Completed);
        assert_eq!(start.elapsed(), Duration::ZERO);

        let cooling = tokio::spawn(async move { pacer.cooldown().await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(other.wait_for_cooldown().await, Wait::Completed);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
        assert_eq!(cooling.await.unwrap(), Wait::Completed);
    }

    #[test]
    fn rate_limits_cool_down_until_the_ceiling() {
        let policy = RetryPolicy::new(&RetryConfig {
            max_attempts_per_item: 3,
            ..RetryConfig::default()
        });
        let limited = AttemptFailure::rate_limited("429");
        assert_eq!(policy.next_step(&limited, 1), NextStep::CoolDown);
        assert_eq!(policy.next_step(&limited, 2), NextStep::CoolDown);
        assert_eq!(policy.next_step(&limited, 3), NextStep::GiveUp);
    }

    #[test]
    fn transient_failures_back_off_linearly_and_terminal_ones_stop() {
        let policy = RetryPolicy::new(&RetryConfig {
            max_attempts_per_item: 4,
            transient_backoff_ms: 500,
            ..RetryConfig::default()
        });
        let transient = AttemptFailure::transient(FailureKind::TransferFailure("503".into()));
        assert_eq!(policy.next_step(&transient, 1), NextStep::Backoff(Duration::from_millis(500)));
        assert_eq!(policy.next_step(&transient, 2), NextStep::Backoff(Duration::from_millis(1_000)));
        let terminal = AttemptFailure::terminal(FailureKind::TransferFailure("404".into()));
        assert_eq!(policy.next_step(&terminal, 1), NextStep::GiveUp);
    }
}
