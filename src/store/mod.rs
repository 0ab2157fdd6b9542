//! Metrics storage for pulsewatch.
//!
//! In-memory per-target histories and a retention-bounded time series, with
//! optional JSON snapshot persistence.

mod metrics;
mod models;
mod snapshot;
mod stats;

pub use metrics::*;
pub use models::*;
pub use snapshot::*;
pub use stats::*;
