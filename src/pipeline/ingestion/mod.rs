// Pipeline ingestion: input files, post fetching and the shared rate limiter

pub mod extractor;
pub mod post_source;
pub mod rate_limiter;
pub mod reddit;

pub use extractor::{ExtractionOutcome, ExtractionState, Extractor};
pub use post_source::load_post_refs;
pub use rate_limiter::{Limits, RateLimiter};
