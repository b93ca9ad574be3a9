// src/services/listing.rs

//! Listing page scanner.
//!
//! Reads a listing page and collects the identifiers of the event cards on it.

use std::collections::BTreeSet;

use reqwest::Client;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::SourceConfig;
use crate::utils::http::fetch_text;

/// Extracts candidate event identifiers from listing pages.
pub struct ListingScanner {
    client: Client,
    card_selector: Selector,
    id_attribute: String,
}

impl ListingScanner {
    /// Create a scanner with the card selector and id attribute from `config`.
    pub fn new(client: Client, config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            client,
            card_selector: parse_selector(&config.card_selector)?,
            id_attribute: config.id_attribute.clone(),
        })
    }

    /// Fetch a listing page and return the distinct event ids on it.
    pub async fn scan(&self, url: &str) -> Result<BTreeSet<String>> {
        let body = fetch_text(&self.client, url).await?;
        let ids = self.extract_ids(&body);
        log::debug!("Found {} event id(s) on {}", ids.len(), url);
        Ok(ids)
    }

    /// Collect the id attribute of every matching card, duplicates collapsed.
    pub fn extract_ids(&self, html: &str) -> BTreeSet<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.card_selector)
            .filter_map(|card| card.value().attr(&self.id_attribute))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
