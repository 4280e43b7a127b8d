use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

pub type Result<T> = std::result::Result<T, ArchiverError>;

/// Why a single post or media item failed.
///
/// These never abort a run; they are recorded in the failure ledger and
/// drive the retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    #[error("extraction failure: {0}")]
    ExtractionFailure(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transfer failure: {0}")]
    TransferFailure(String),

    #[error("content mismatch: {0}")]
    ContentMismatch(String),

    #[error("permanent failure: {0}")]
    PermanentFailure(String),
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::ExtractionFailure(_) => "extraction_failure",
            FailureKind::RateLimited(_) => "rate_limited",
            FailureKind::TransferFailure(_) => "transfer_failure",
            FailureKind::ContentMismatch(_) => "content_mismatch",
            FailureKind::PermanentFailure(_) => "permanent_failure",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            FailureKind::ExtractionFailure(d)
            | FailureKind::RateLimited(d)
            | FailureKind::TransferFailure(d)
            | FailureKind::ContentMismatch(d)
            | FailureKind::PermanentFailure(d) => d,
        }
    }

    /// Rebuild a failure from the `label: detail` form written to ledger files.
    pub fn from_ledger(label: &str, detail: &str) -> Self {
        let detail = detail.to_string();
        match label.trim() {
            "extraction_failure" => FailureKind::ExtractionFailure(detail),
            "rate_limited" => FailureKind::RateLimited(detail),
            "content_mismatch" => FailureKind::ContentMismatch(detail),
            "permanent_failure" => FailureKind::PermanentFailure(detail),
            _ => FailureKind::TransferFailure(detail),
        }
    }
}

/// A failed attempt plus whether the same item may be retried within the
/// current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub retry_in_place: bool,
}

impl AttemptFailure {
    pub fn transient(kind: FailureKind) -> Self {
        Self {
            kind,
            retry_in_place: true,
        }
    }

    pub fn terminal(kind: FailureKind) -> Self {
        Self {
            kind,
            retry_in_place: false,
        }
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::transient(FailureKind::RateLimited(detail.into()))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind, FailureKind::RateLimited(_))
    }
}
