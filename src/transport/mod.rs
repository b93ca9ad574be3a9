//! Delivery transports.
//!
//! A transport performs exactly one send attempt and reports what happened as
//! a `SendOutcome`. Retrying is the delivery engine's job.

mod discord;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::models::NotificationPayload;

pub use discord::{ChannelTransport, DestinationRouter, WebhookTransport};

/// Result of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The platform accepted the message
    Delivered,
    /// Throttled; `retry_after` is the server-advised wait, if any
    RateLimited { retry_after: Option<Duration> },
    /// Transient failure worth retrying
    Failed { reason: String },
    /// Permanent failure; retrying cannot help
    Rejected { reason: String },
}

/// Sends one notification to one destination.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, destination: &str, payload: &NotificationPayload) -> SendOutcome;
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// Map a platform response to an outcome.
///
/// The JSON body's `retry_after` wins over the `Retry-After` header; both are
/// seconds and may be fractional.
pub fn outcome_for(status: StatusCode, retry_after_header: Option<&str>, body: &str) -> SendOutcome {
    if status.is_success() {
        return SendOutcome::Delivered;
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let from_body = serde_json::from_str::<RateLimitBody>(body)
            .ok()
            .map(|b| b.retry_after);
        let from_header = retry_after_header.and_then(|h| h.trim().parse::<f64>().ok());
        let retry_after = from_body
            .or(from_header)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        return SendOutcome::RateLimited { retry_after };
    }

    let reason = format!("HTTP {status}: {}", snippet(body));
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        SendOutcome::Failed { reason }
    } else {
        SendOutcome::Rejected { reason }
    }
}

fn snippet(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
