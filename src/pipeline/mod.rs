//! Pipeline stages run on every poll.
//!
//! - `gate`: Drop started and already-announced events
//! - `delivery`: Send notifications with retry and commit dedup marks
//! - `poll`: Drive scan → enrich → gate → deliver over all trackers

pub mod delivery;
pub mod gate;
pub mod poll;

pub use delivery::{DeliveryEngine, DeliveryReport, RetryPolicy};
pub use gate::{GateResult, GateTally, admit};
pub use poll::{PassReport, Poller, TrackerReport};
