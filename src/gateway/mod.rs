// File gateway: block files, artifacts, ledgers and checkpoints under the output root

pub mod artifacts;
pub mod block_file;
pub mod checkpoint;
pub mod download_log;
pub mod failure_ledger;

pub use checkpoint::CheckpointStore;
pub use download_log::DownloadLog;
pub use failure_ledger::FailureLedger;
