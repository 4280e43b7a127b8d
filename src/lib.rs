pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Layered boundaries: use cases over ports, adapters in infra
pub mod app;
pub mod infra;

// File-backed artifacts, ledgers and checkpoints
pub mod gateway;

pub mod observability;
pub mod pipeline;

pub use config::Config;
pub use error::{ArchiverError, FailureKind, Result};
