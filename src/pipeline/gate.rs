// src/pipeline/gate.rs

//! Temporal filter and dedup gate.
//!
//! Decides which looked-up events are eligible for delivery to a destination:
//! the event must decode, must not have started yet, and must not already be
//! marked as delivered there.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::models::EventRecord;
use crate::storage::TrackerStore;

/// Per-batch counts of gate decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateTally {
    pub admitted: usize,
    pub past: usize,
    pub already_processed: usize,
    pub malformed: usize,
}

/// Events admitted for delivery plus the tally of the whole batch.
#[derive(Debug, Default)]
pub struct GateResult {
    pub admitted: Vec<EventRecord>,
    pub tally: GateTally,
}

/// Filter raw events for `destination` as of `now`.
///
/// A malformed event is logged and skipped. Started events are dropped
/// without being marked, so they never enter the dedup set. An id repeated
/// within `events` is admitted once.
pub fn admit(
    events: &[Value],
    destination: &str,
    store: &dyn TrackerStore,
    now: DateTime<Utc>,
) -> Result<GateResult> {
    let mut result = GateResult::default();
    let mut seen = HashSet::new();

    for raw in events {
        let event = match EventRecord::from_value(raw) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Skipping event: {}", e);
                result.tally.malformed += 1;
                continue;
            }
        };

        if !event.is_upcoming(now) {
            log::debug!("Event {} already started at {}", event.id, event.start);
            result.tally.past += 1;
            continue;
        }

        if seen.contains(&event.id) || store.is_processed(&event.id, destination)? {
            log::debug!("Event {} already announced to {}", event.id, destination);
            result.tally.already_processed += 1;
            continue;
        }

        seen.insert(event.id.clone());
        result.tally.admitted += 1;
        result.admitted.push(event);
    }

    Ok(result)
}
