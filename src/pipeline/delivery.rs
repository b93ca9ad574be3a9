// src/pipeline/delivery.rs

//! Delivery engine.
//!
//! Renders admitted events, sends them through a `Transport` with exponential
//! backoff, and commits the dedup record only after the platform accepted the
//! message. A crash between acceptance and the commit can cause one duplicate
//! announcement on the next pass.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::{DeliveryConfig, EventRecord, NotificationPayload};
use crate::storage::TrackerStore;
use crate::transport::{SendOutcome, Transport};

/// Attempt limit and first backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl From<&DeliveryConfig> for RetryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// Accepted on the given attempt
    Delivered { attempts: u32 },
    /// Every attempt failed; the event stays pending
    Exhausted { attempts: u32, last_error: String },
    /// Permanent failure; remaining attempts were skipped
    Rejected { attempts: u32, reason: String },
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts }
            | Self::Exhausted { attempts, .. }
            | Self::Rejected { attempts, .. } => *attempts,
        }
    }
}

/// Sends notifications with retry and records successful deliveries.
pub struct DeliveryEngine {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    announcement: String,
}

impl DeliveryEngine {
    pub fn new(transport: Arc<dyn Transport>, config: &DeliveryConfig) -> Self {
        Self {
            transport,
            policy: RetryPolicy::from(config),
            announcement: config.announcement.clone(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Render `event`, send it, and mark it processed on success.
    pub async fn deliver(
        &self,
        event: &EventRecord,
        destination: &str,
        store: &dyn TrackerStore,
    ) -> Result<DeliveryReport> {
        let payload = NotificationPayload::render(event, &self.announcement);
        let report = self.send_with_retry(destination, &payload).await;

        match &report {
            DeliveryReport::Delivered { attempts } => {
                store.mark_processed(&event.id, destination)?;
                log::info!(
                    "Announced event {} ({}) to {} after {} attempt(s)",
                    event.id,
                    payload.title(),
                    destination,
                    attempts
                );
            }
            DeliveryReport::Exhausted {
                attempts,
                last_error,
            } => {
                log::error!(
                    "Giving up on event {} for {} after {} attempt(s): {}. Will retry next pass.",
                    event.id,
                    destination,
                    attempts,
                    last_error
                );
            }
            DeliveryReport::Rejected { reason, .. } => {
                log::error!(
                    "Event {} rejected by {}: {}",
                    event.id,
                    destination,
                    reason
                );
            }
        }

        Ok(report)
    }

    /// Send `payload`, retrying transient failures with exponential backoff.
    ///
    /// Rate-limited attempts wait the server-advised duration when one is
    /// given. The backoff doubles after every non-success either way.
    pub async fn send_with_retry(
        &self,
        destination: &str,
        payload: &NotificationPayload,
    ) -> DeliveryReport {
        let max_attempts = self.policy.max_attempts;
        let mut backoff = self.policy.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let wait = match self.transport.send(destination, payload).await {
                SendOutcome::Delivered => return DeliveryReport::Delivered { attempts: attempt },
                SendOutcome::Rejected { reason } => {
                    return DeliveryReport::Rejected {
                        attempts: attempt,
                        reason,
                    };
                }
                SendOutcome::RateLimited { retry_after } => {
                    let wait = retry_after.unwrap_or(backoff);
                    last_error = format!("rate limited (retry after {wait:?})");
                    wait
                }
                SendOutcome::Failed { reason } => {
                    last_error = reason;
                    backoff
                }
            };

            log::warn!(
                "Delivery to {} failed (attempt {}/{}): {}",
                destination,
                attempt,
                max_attempts,
                last_error
            );

            if attempt < max_attempts {
                tokio::time::sleep(wait).await;
            }
            backoff = backoff.saturating_mul(2);
        }

        DeliveryReport::Exhausted {
            attempts: max_attempts,
            last_error,
        }
    }
}
