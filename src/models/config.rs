//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listing page and event API settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Notification delivery and retry settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Poll loop settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.source.user_agent.trim().is_empty() {
            return Err(AppError::validation("source.user_agent is empty"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::validation("source.timeout_secs must be > 0"));
        }
        if self.source.id_attribute.trim().is_empty() {
            return Err(AppError::validation("source.id_attribute is empty"));
        }
        scraper::Selector::parse(&self.source.card_selector)
            .map_err(|e| AppError::selector(&self.source.card_selector, format!("{e:?}")))?;
        url::Url::parse(&self.source.api_url)?;
        url::Url::parse(&self.delivery.api_base)?;
        if self.delivery.max_attempts == 0 {
            return Err(AppError::validation("delivery.max_attempts must be > 0"));
        }
        if self.poll.interval_secs == 0 {
            return Err(AppError::validation("poll.interval_secs must be > 0"));
        }
        if self.poll.max_concurrent_trackers == 0 {
            return Err(AppError::validation(
                "poll.max_concurrent_trackers must be > 0",
            ));
        }
        Ok(())
    }
}

/// Listing page and event lookup API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Bulk event lookup endpoint
    #[serde(default = "defaults::api_url")]
    pub api_url: String,

    /// Sub-resources requested from the lookup endpoint
    #[serde(default = "defaults::expand")]
    pub expand: Vec<String>,

    /// Selector for event card anchors on a listing page
    #[serde(default = "defaults::card_selector")]
    pub card_selector: String,

    /// Attribute holding the event identifier on each card
    #[serde(default = "defaults::id_attribute")]
    pub id_attribute: String,

    /// Listing URLs accepted by `track` must start with this
    #[serde(default = "defaults::allowed_url_prefix")]
    pub allowed_url_prefix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            api_url: defaults::api_url(),
            expand: defaults::expand(),
            card_selector: defaults::card_selector(),
            id_attribute: defaults::id_attribute(),
            allowed_url_prefix: defaults::allowed_url_prefix(),
        }
    }
}

/// Delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Attempts per notification before giving up until the next pass
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds, doubled after every failure
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Message content sent alongside every event embed
    #[serde(default = "defaults::announcement")]
    pub announcement: String,

    /// Chat platform REST base URL for direct channel posts
    #[serde(default = "defaults::api_base")]
    pub api_base: String,
}

impl DeliveryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            initial_backoff_ms: defaults::initial_backoff_ms(),
            announcement: defaults::announcement(),
            api_base: defaults::api_base(),
        }
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds between the start of two passes
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Trackers processed at once within a pass (1 = strictly sequential)
    #[serde(default = "defaults::max_concurrent_trackers")]
    pub max_concurrent_trackers: usize,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            max_concurrent_trackers: defaults::max_concurrent_trackers(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file, relative to the data directory
    #[serde(default = "defaults::database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: defaults::database(),
        }
    }
}

mod defaults {
    // Source defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; eventwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn api_url() -> String {
        "https://www.eventbrite.ca/api/v3/destination/events/".into()
    }
    pub fn expand() -> Vec<String> {
        [
            "event_sales_status",
            "image",
            "primary_venue",
            "saves",
            "ticket_availability",
            "primary_organizer",
            "public_collection",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn card_selector() -> String {
        "a.event-card-link".into()
    }
    pub fn id_attribute() -> String {
        "data-event-id".into()
    }
    pub fn allowed_url_prefix() -> String {
        "https://www.eventbrite".into()
    }

    // Delivery defaults
    pub fn max_attempts() -> u32 {
        5
    }
    pub fn initial_backoff_ms() -> u64 {
        1_000
    }
    pub fn announcement() -> String {
        "New event found!".into()
    }
    pub fn api_base() -> String {
        "https://discord.com/api/v10".into()
    }

    // Poll defaults
    pub fn interval() -> u64 {
        30 * 60
    }
    pub fn max_concurrent_trackers() -> usize {
        1
    }

    // Storage defaults
    pub fn database() -> String {
        "events.db".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.source.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.delivery.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_selector() {
        let mut config = Config::default();
        config.source.card_selector = "[[invalid".to_string();
        assert!(matches!(
            config.validate(),
            Err(AppError::Selector { .. })
        ));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [poll]
            interval_secs = 60

            [delivery]
            announcement = "Heads up!"
            "#,
        )
        .unwrap();

        assert_eq!(config.poll.interval(), Duration::from_secs(60));
        assert_eq!(config.poll.max_concurrent_trackers, 1);
        assert_eq!(config.delivery.announcement, "Heads up!");
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.source.card_selector, "a.event-card-link");
    }

    #[test]
    fn load_or_default_on_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(tmp.path().join("missing.toml"));
        assert_eq!(config.storage.database, "events.db");
        assert_eq!(config.poll.interval_secs, 1800);
    }
}
