//! Tracker and dedup record structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A listing page polled on behalf of one destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tracker {
    /// Listing page URL
    pub source_url: String,

    /// Opaque destination identifier (channel id or webhook URL)
    pub destination: String,
}

impl Tracker {
    pub fn new(source_url: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            destination: destination.into(),
        }
    }
}

/// An event already announced to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub destination: String,
    pub processed_at: DateTime<Utc>,
}

/// Shape of a destination identifier, as understood by the transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationKind {
    /// Numeric chat channel id
    Channel(u64),
    /// Webhook endpoint URL
    Webhook(url::Url),
    /// Neither of the above
    Unknown,
}

impl DestinationKind {
    /// Classify a destination identifier.
    pub fn of(destination: &str) -> Self {
        let trimmed = destination.trim();
        if let Ok(id) = trimmed.parse::<u64>() {
            return Self::Channel(id);
        }
        match url::Url::parse(trimmed) {
            Ok(url) if url.scheme() == "https" => Self::Webhook(url),
            _ => Self::Unknown,
        }
    }

    /// Human-readable label safe to show in chat (webhook tokens are hidden).
    pub fn label(destination: &str) -> String {
        match Self::of(destination) {
            Self::Channel(id) => format!("<#{id}>"),
            Self::Webhook(url) => {
                let hook_id = url
                    .path_segments()
                    .and_then(|mut segments| {
                        segments.find(|s| s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty())
                    })
                    .unwrap_or("?");
                format!("webhook {}/…/{hook_id}", url.host_str().unwrap_or("?"))
            }
            Self::Unknown => destination.to_string(),
        }
    }
}
