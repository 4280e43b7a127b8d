// Acquisition: resolve, fetch, sniff and persist work items under pacing

pub mod engine;
pub mod resolver;

pub use engine::{AcquisitionEngine, DownloadState, RunSummary};
pub use resolver::MediaResolver;

use crate::app::ports::HttpFailure;
use crate::error::{AttemptFailure, FailureKind};

/// Map a non-2xx status to a failure. 429 cools down, 408 and 5xx are worth
/// another attempt in place, anything else waits for the next pass.
pub fn failure_for_status(status: u16, url: &str) -> AttemptFailure {
    let detail = format!("HTTP {} for {}", status, url);
    match status {
        429 => AttemptFailure::rate_limited(detail),
        408 | 500..=599 => AttemptFailure::transient(FailureKind::TransferFailure(detail)),
        _ => AttemptFailure::terminal(FailureKind::TransferFailure(detail)),
    }
}

/// Requests that never got a response are transient.
pub fn failure_for_transport(failure: &HttpFailure, url: &str) -> AttemptFailure {
    AttemptFailure::transient(FailureKind::TransferFailure(format!("{} ({})", failure, url)))
}
