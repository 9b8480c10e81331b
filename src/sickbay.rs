//! Fleet health assessment
//!
//! Provides:
//! - Concurrent probing of every target over the remote channel
//! - Aggregation into a single timestamped snapshot
//! - Threshold and quorum triage producing one decision per target

pub mod prober;
pub mod snapshot;
pub mod triage;

pub use prober::{ProbeResult, Prober};
pub use snapshot::FleetSnapshot;
pub use triage::Decision;
