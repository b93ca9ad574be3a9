//! Service layer for the event watcher.
//!
//! This module contains the network-facing stages of a poll:
//! - Listing scanning (`ListingScanner`)
//! - Bulk event lookup (`EventEnricher`)
//!
//! `EventSource` bundles both behind one trait so the pipeline can be driven
//! by a fake in tests.

mod enricher;
mod listing;

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::Result;
use crate::models::SourceConfig;

pub use enricher::EventEnricher;
pub use listing::ListingScanner;

/// Where candidate events come from.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Distinct event ids listed on a listing page.
    async fn scan(&self, listing_url: &str) -> Result<BTreeSet<String>>;

    /// Raw event objects for a non-empty set of ids.
    async fn enrich(&self, ids: &BTreeSet<String>) -> Result<Vec<Value>>;
}

/// Event source backed by Eventbrite listing pages and the destination API.
pub struct EventbriteSource {
    scanner: ListingScanner,
    enricher: EventEnricher,
}

impl EventbriteSource {
    pub fn new(client: Client, config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            scanner: ListingScanner::new(client.clone(), config)?,
            enricher: EventEnricher::new(client, config),
        })
    }
}

#[async_trait]
impl EventSource for EventbriteSource {
    async fn scan(&self, listing_url: &str) -> Result<BTreeSet<String>> {
        self.scanner.scan(listing_url).await
    }

    async fn enrich(&self, ids: &BTreeSet<String>) -> Result<Vec<Value>> {
        self.enricher.enrich(ids).await
    }
}
