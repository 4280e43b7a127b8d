//! File and folder names shared by the extraction, download and retry stages.
//! Everything lives under the configured output root.

// Archive folders, one per sniffed content kind
pub const IMAGES_DIR: &str = "Images";
pub const VIDEOS_DIR: &str = "Videos";
pub const GIFS_DIR: &str = "Gifs";
pub const NOTES_DIR: &str = "Notes";

// Extraction artifacts
pub const ALL_EXTRACTED_FILE: &str = "all_extracted.txt";
pub const DEDUPLICATED_FILE: &str = "deduplicated.txt";
pub const DEDUPLICATED_URLS_FILE: &str = "deduplicated_urls.txt";

// Failure ledger (pass 0 lives at the root, later passes under RETRY_DIR)
pub const FAILED_EXTRACTION_FILE: &str = "failed_extraction.txt";
pub const FAILED_DOWNLOADS_FILE: &str = "failed_downloads.txt";
pub const RETRY_DIR: &str = "retry";
pub const RESOLVED_FILE: &str = "resolved.txt";
pub const PERMANENT_FAILURES_FILE: &str = "permanent_failures.txt";
pub const PASS_COMPLETE_MARKER: &str = ".complete";

// Success ledger
pub const DOWNLOADED_FILE: &str = "downloaded.txt";

// Checkpoints
pub const CHECKPOINT_DIR: &str = ".checkpoint";
pub const EXTRACTION_CHECKPOINT: &str = "extraction.json";
pub const DOWNLOAD_CHECKPOINT: &str = "download.json";

// Observability
pub const METRICS_SNAPSHOT_FILE: &str = "metrics.prom";
pub const LOG_DIR: &str = "logs";
pub const LOG_FILE_PREFIX: &str = "archiver.log";

// Content sniffing
pub const SNIFF_WINDOW: usize = 1024;
pub const READABLE_RATIO_THRESHOLD: f64 = 0.8;

// RedGifs v2 API
pub const REDGIFS_API_BASE: &str = "https://api.redgifs.com";

pub const DEFAULT_USER_AGENT: &str = "media_archiver/0.1 (personal saved-post archive)";
