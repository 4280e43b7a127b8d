// Observability: structured logging and run metrics

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init, write_snapshot};
