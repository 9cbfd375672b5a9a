//! Observability subsystem
//!
//! - Typed lifecycle [`Event`]s emitted as `tracing` records
//! - Exact [`MvccMetrics`] counters
//!
//! The library only emits; installing a subscriber is the host's job.
//!
//! # Usage
//!
//! ```ignore
//! use revstore::observability::{log_event, Event};
//! use tracing::info;
//!
//! log_event(Event::StoreOpen);
//! info!(event = %Event::CompactionScheduled, rev = 42, "compaction scheduled");
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsSnapshot, MvccMetrics};

use tracing::{debug, error, info};

/// Log a lifecycle event at the level its kind calls for.
pub fn log_event(event: Event) {
    if event.is_fatal() {
        error!(event = event.as_str());
    } else if event.is_verbose() {
        debug!(event = event.as_str());
    } else {
        info!(event = event.as_str());
    }
}

/// Log a lifecycle event carrying a revision.
pub fn log_revision_event(event: Event, rev: i64) {
    if event.is_fatal() {
        error!(event = event.as_str(), rev);
    } else if event.is_verbose() {
        debug!(event = event.as_str(), rev);
    } else {
        info!(event = event.as_str(), rev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        // No subscriber installed; verifies no panic
        log_event(Event::StoreOpen);
        log_event(Event::Corruption);
        log_revision_event(Event::CompactionFinished, 7);
    }
}
