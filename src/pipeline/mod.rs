// Media acquisition pipeline: ingestion, processing, acquisition and storage

pub mod acquisition;
pub mod ingestion;
pub mod pacing;
pub mod processing;
pub mod storage;

pub use acquisition::{AcquisitionEngine, RunSummary};
pub use ingestion::Extractor;
pub use pacing::{CancelHandle, CancelToken};
