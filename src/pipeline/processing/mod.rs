// Pipeline processing: classification, deduplication and content sniffing

pub mod classifier;
pub mod dedup;
pub mod providers;
pub mod sniffer;

pub use classifier::{classify, classify_fragment};
pub use dedup::reduce;
pub use sniffer::sniff;
