//! Storage abstractions for tracker and dedup persistence.
//!
//! Two durable tables back the watcher:
//!
//! ```text
//! trackers          (url, destination)                  UNIQUE(url, destination)
//! processed_events  (event_id, destination, processed_at) PRIMARY KEY(event_id, destination)
//! ```
//!
//! Every call is one statement against durable storage. There is no cache,
//! so a dedup check always sees the latest committed mark.

mod migrations;
pub mod sqlite;

use crate::error::Result;
use crate::models::{ProcessedEvent, Tracker};

// Re-export for convenience
pub use sqlite::SqliteStore;

/// Trait for tracker and dedup storage backends.
pub trait TrackerStore: Send + Sync {
    /// Register a tracker. Returns `false` when the pair already existed.
    fn add_tracker(&self, url: &str, destination: &str) -> Result<bool>;

    /// Deregister a tracker. Returns `false` when nothing matched.
    fn remove_tracker(&self, url: &str, destination: &str) -> Result<bool>;

    /// All registered trackers, in no particular order.
    fn list_trackers(&self) -> Result<Vec<Tracker>>;

    /// Trackers registered for a single destination.
    fn trackers_for(&self, destination: &str) -> Result<Vec<Tracker>>;

    /// Whether `event_id` was already delivered to `destination`.
    fn is_processed(&self, event_id: &str, destination: &str) -> Result<bool>;

    /// Record a delivery, refreshing the timestamp if already present.
    fn mark_processed(&self, event_id: &str, destination: &str) -> Result<()>;

    /// Drop all dedup records of a destination. Returns rows removed.
    fn clear_processed(&self, destination: &str) -> Result<usize>;

    /// Dedup records of a destination.
    fn processed_for(&self, destination: &str) -> Result<Vec<ProcessedEvent>>;
}
