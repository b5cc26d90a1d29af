//! Client-side synchronization - reconciliation engine and its driver
//!
//! Each connected client owns one [`SessionConnection`]. It merges the last
//! authoritative snapshot, local optimistic edits and inbound change events
//! into a single [`ViewModel`], re-fetching through a throttle rather than
//! applying event payloads.

mod backend;
mod connection;
mod reconciler;
mod shaper;
mod view;

pub use backend::{LocalBackend, SessionBackend};
pub use connection::{SessionConnection, Wake};
pub use reconciler::{Reconciler, Tick};
pub use shaper::{Debounce, Throttle};
pub use view::{SyncState, ViewModel};

use std::time::Duration;

/// Timing knobs for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Minimum spacing of change-triggered re-fetches
    pub refetch_interval: Duration,

    /// Idle time after the last local edit before the override is dropped
    pub quiescence: Duration,

    /// Snapshot polling period when the change feed is unavailable
    pub poll_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            refetch_interval: Duration::from_millis(500),
            quiescence: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(2000),
        }
    }
}
