//! Notification payload sent to a destination.

use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::models::EventRecord;

/// Embed title limit enforced by the chat platform.
pub const MAX_TITLE_LEN: usize = 256;
/// Embed description limit enforced by the chat platform.
pub const MAX_DESCRIPTION_LEN: usize = 4096;

const ACCENT_COLOR: u32 = 0x00ff00;

/// Rendered announcement for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub content: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub description: String,
    pub color: u32,
    pub footer: EmbedFooter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

impl NotificationPayload {
    /// Render an event under the given announcement line.
    pub fn render(event: &EventRecord, announcement: &str) -> Self {
        let embed = Embed {
            title: truncate(&event.name, MAX_TITLE_LEN),
            url: event.url.clone(),
            description: truncate(&event.summary, MAX_DESCRIPTION_LEN),
            color: ACCENT_COLOR,
            footer: EmbedFooter {
                text: format!("Event time: {}", event.time_range()),
            },
            image: event
                .image_url
                .as_ref()
                .map(|url| EmbedImage { url: url.clone() }),
        };

        Self {
            content: announcement.to_string(),
            embeds: vec![embed],
        }
    }

    /// Title of the first embed, for log lines.
    pub fn title(&self) -> &str {
        self.embeds.first().map_or("", |e| e.title.as_str())
    }
}

/// Cut `text` to at most `max` characters without splitting a grapheme.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let len = grapheme.chars().count();
        if used + len > max - 1 {
            break;
        }
        out.push_str(grapheme);
        used += len;
    }
    out.push('…');
    out
}
