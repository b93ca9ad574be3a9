//! Discord delivery: bot-authenticated channel posts and webhook posts.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use url::Url;

use crate::models::{DestinationKind, NotificationPayload};
use crate::transport::{SendOutcome, Transport, outcome_for};

/// Posts messages into a channel through the REST API with a bot token.
pub struct ChannelTransport {
    client: Client,
    api_base: String,
    token: String,
}

impl ChannelTransport {
    pub fn new(client: Client, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn endpoint(&self, channel_id: u64) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel_id)
    }

    fn request(&self, channel_id: u64, payload: &NotificationPayload) -> RequestBuilder {
        self.client
            .post(self.endpoint(channel_id))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .json(payload)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, destination: &str, payload: &NotificationPayload) -> SendOutcome {
        let DestinationKind::Channel(channel_id) = DestinationKind::of(destination) else {
            return SendOutcome::Rejected {
                reason: format!("'{destination}' is not a channel id"),
            };
        };

        execute(self.request(channel_id, payload)).await
    }
}

/// Posts messages to webhook URLs.
pub struct WebhookTransport {
    client: Client,
}

impl WebhookTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request(&self, mut url: Url, payload: &NotificationPayload) -> RequestBuilder {
        // Ask the platform to confirm the message was created.
        url.query_pairs_mut().append_pair("wait", "true");
        self.client.post(url).json(payload)
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn send(&self, destination: &str, payload: &NotificationPayload) -> SendOutcome {
        let DestinationKind::Webhook(url) = DestinationKind::of(destination) else {
            return SendOutcome::Rejected {
                reason: format!("'{}' is not a webhook URL", DestinationKind::label(destination)),
            };
        };

        execute(self.request(url, payload)).await
    }
}

/// Picks a transport from the shape of the destination.
pub struct DestinationRouter {
    channel: Option<ChannelTransport>,
    webhook: WebhookTransport,
}

impl DestinationRouter {
    /// `channel` is `None` when no bot token is configured.
    pub fn new(channel: Option<ChannelTransport>, webhook: WebhookTransport) -> Self {
        Self { channel, webhook }
    }
}

#[async_trait]
impl Transport for DestinationRouter {
    async fn send(&self, destination: &str, payload: &NotificationPayload) -> SendOutcome {
        match DestinationKind::of(destination) {
            DestinationKind::Channel(_) => match &self.channel {
                Some(channel) => channel.send(destination, payload).await,
                None => SendOutcome::Rejected {
                    reason: "no bot token configured for channel delivery".to_string(),
                },
            },
            DestinationKind::Webhook(_) => self.webhook.send(destination, payload).await,
            DestinationKind::Unknown => SendOutcome::Rejected {
                reason: format!("unrecognized destination '{destination}'"),
            },
        }
    }
}

async fn execute(request: RequestBuilder) -> SendOutcome {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            return SendOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };

    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response.text().await.unwrap_or_default();

    outcome_for(status, retry_after.as_deref(), &body)
}
