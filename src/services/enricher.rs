// src/services/enricher.rs

//! Event enricher.
//!
//! Resolves a batch of event ids into full event objects with a single call
//! to the bulk lookup endpoint.

use std::collections::BTreeSet;

use reqwest::Client;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::SourceConfig;
use crate::utils::http::ensure_success;

/// Client for the bulk event lookup endpoint.
pub struct EventEnricher {
    client: Client,
    api_url: String,
    expand: String,
}

impl EventEnricher {
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            expand: config.expand.join(","),
        }
    }

    /// Query parameters for one lookup of `ids`.
    ///
    /// The page size equals the id count so every event comes back in one page.
    pub fn query_params(&self, ids: &BTreeSet<String>) -> [(&'static str, String); 3] {
        [
            ("event_ids", ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")),
            ("page_size", ids.len().to_string()),
            ("expand", self.expand.clone()),
        ]
    }

    /// Look up all `ids` and return the raw event objects.
    pub async fn enrich(&self, ids: &BTreeSet<String>) -> Result<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .get(&self.api_url)
            .query(&self.query_params(ids))
            .send()
            .await?;
        let body: Value = ensure_success(response)?.json().await?;

        let events = extract_events(body, &self.api_url)?;
        log::debug!(
            "Lookup returned {} of {} requested event(s)",
            events.len(),
            ids.len()
        );
        Ok(events)
    }
}

/// Pull the `events` array out of a lookup response body.
fn extract_events(body: Value, context: &str) -> Result<Vec<Value>> {
    match body {
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(events)) => Ok(events),
            Some(other) => Err(AppError::response(
                context,
                format!("'events' is not an array: {other}"),
            )),
            None => Err(AppError::response(context, "missing 'events' field")),
        },
        other => Err(AppError::response(
            context,
            format!("expected an object, got {other}"),
        )),
    }
}
