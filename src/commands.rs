// src/commands.rs

//! Chat command surface: `track`, `untrack` and `list_tracking`.
//!
//! Commands arrive as plain text (`!track <url> [#channel]`) together with
//! who sent them. Every outcome, including usage and permission errors, is
//! turned into a reply string for the invoker.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use tokio::task::JoinSet;

use crate::error::{AppError, Result};
use crate::models::{DestinationKind, Tracker};
use crate::pipeline::Poller;
use crate::utils::is_allowed_listing_url;

const PREFIX: &str = "!";

static CHANNEL_MENTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^<#(\d+)>$").ok());

pub const PERMISSION_DENIED: &str = "You need 'Manage Channels' permission to use this command.";
const INVALID_URL: &str = "Please provide a valid Eventbrite URL";
const INTERNAL_ERROR: &str = "Something went wrong while running that command.";

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Track {
        url: String,
        destination: Option<String>,
    },
    Untrack {
        url: String,
        destination: Option<String>,
    },
    ListTracking {
        destination: Option<String>,
    },
}

/// The user issuing a command.
#[derive(Debug, Clone)]
pub struct Invoker {
    /// Destination the command was typed in; the default target
    pub channel: String,
    pub can_manage_channels: bool,
}

impl Invoker {
    pub fn new(channel: impl Into<String>, can_manage_channels: bool) -> Self {
        Self {
            channel: channel.into(),
            can_manage_channels,
        }
    }
}

pub struct CommandHandler {
    poller: Arc<Poller>,
    allowed_url_prefix: String,
    /// Initial polls started by `track`, still running or unawaited
    follow_ups: Mutex<JoinSet<()>>,
}

impl CommandHandler {
    pub fn new(poller: Arc<Poller>, allowed_url_prefix: impl Into<String>) -> Self {
        Self {
            poller,
            allowed_url_prefix: allowed_url_prefix.into(),
            follow_ups: Mutex::new(JoinSet::new()),
        }
    }

    /// Wait for every initial poll started by `track` so far.
    pub async fn settle(&self) {
        let mut pending = std::mem::take(
            &mut *self
                .follow_ups
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                log::error!("Initial poll task failed: {}", e);
            }
        }
    }

    /// Parse a chat message.
    ///
    /// Returns `Ok(None)` for messages that are not commands of ours, and a
    /// `Command` error carrying the usage line for malformed ones.
    pub fn parse(&self, text: &str) -> Result<Option<Command>> {
        let Some(body) = text.trim().strip_prefix(PREFIX) else {
            return Ok(None);
        };
        let mut args = body.split_whitespace();
        let Some(name) = args.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = args.collect();

        let command = match name {
            "track" => {
                let (url, destination) = url_and_destination(&rest, "track")?;
                Command::Track { url, destination }
            }
            "untrack" => {
                let (url, destination) = url_and_destination(&rest, "untrack")?;
                Command::Untrack { url, destination }
            }
            "list_tracking" => {
                if rest.len() > 1 {
                    return Err(usage("list_tracking", false));
                }
                let destination = rest
                    .first()
                    .map(|arg| parse_destination(arg))
                    .transpose()?;
                Command::ListTracking { destination }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    /// Parse and run a message; `None` when it was not a command.
    pub async fn handle(&self, invoker: &Invoker, text: &str) -> Option<String> {
        let reply = match self.parse(text) {
            Ok(Some(command)) => self.execute(invoker, command).await,
            Ok(None) => return None,
            Err(e) => Err(e),
        };

        Some(match reply {
            Ok(reply) => reply,
            Err(AppError::Command(message)) => message,
            Err(e) => {
                log::error!("Command '{}' failed: {}", text.trim(), e);
                INTERNAL_ERROR.to_string()
            }
        })
    }

    /// Run a parsed command on behalf of `invoker`.
    ///
    /// `track` replies as soon as the tracker is registered; its first poll
    /// runs in the background (see `settle`).
    pub async fn execute(&self, invoker: &Invoker, command: Command) -> Result<String> {
        match command {
            Command::Track { url, destination } => {
                self.require_manage(invoker)?;
                if !is_allowed_listing_url(&url, &self.allowed_url_prefix) {
                    return Err(AppError::command(INVALID_URL));
                }
                let destination = destination.unwrap_or_else(|| invoker.channel.clone());

                if self.poller.store().add_tracker(&url, &destination)? {
                    log::info!("Tracking {} for {}", url, destination);
                } else {
                    log::info!("{} already tracked for {}", url, destination);
                }

                let reply = format!(
                    "Now tracking events from: {} in {}",
                    url,
                    DestinationKind::label(&destination)
                );

                let tracker = Tracker::new(url, destination);
                let poller = Arc::clone(&self.poller);
                let mut follow_ups = self
                    .follow_ups
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                while follow_ups.try_join_next().is_some() {}
                follow_ups.spawn(async move {
                    if let Err(e) = poller.poll_tracker(&tracker).await {
                        log::warn!(
                            "Initial poll of {} for {} failed: {}",
                            tracker.source_url,
                            tracker.destination,
                            e
                        );
                    }
                });
                drop(follow_ups);

                Ok(reply)
            }
            Command::Untrack { url, destination } => {
                self.require_manage(invoker)?;
                let destination = destination.unwrap_or_else(|| invoker.channel.clone());
                let store = self.poller.store();

                let removed = store.remove_tracker(&url, &destination)?;
                let cleared = store.clear_processed(&destination)?;
                log::info!(
                    "Untracked {} for {} (existed: {}, {} dedup record(s) cleared)",
                    url,
                    destination,
                    removed,
                    cleared
                );

                Ok(format!(
                    "Stopped tracking: {} in {}",
                    url,
                    DestinationKind::label(&destination)
                ))
            }
            Command::ListTracking { destination } => match destination {
                Some(destination) => self.list_for(&destination),
                None => self.list_all(),
            },
        }
    }

    fn require_manage(&self, invoker: &Invoker) -> Result<()> {
        if invoker.can_manage_channels {
            Ok(())
        } else {
            Err(AppError::command(PERMISSION_DENIED))
        }
    }

    fn list_for(&self, destination: &str) -> Result<String> {
        let trackers = self.poller.store().trackers_for(destination)?;
        let label = DestinationKind::label(destination);
        if trackers.is_empty() {
            return Ok(format!("No URLs are being tracked in {label}"));
        }

        let urls: Vec<&str> = trackers.iter().map(|t| t.source_url.as_str()).collect();
        Ok(format!("URLs tracked in {label}:\n{}", urls.join("\n")))
    }

    fn list_all(&self) -> Result<String> {
        let trackers = self.poller.store().list_trackers()?;
        if trackers.is_empty() {
            return Ok("No URLs are currently being tracked in any channel.".to_string());
        }

        let mut by_destination: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tracker in trackers {
            by_destination
                .entry(tracker.destination)
                .or_default()
                .push(tracker.source_url);
        }

        let mut reply = String::from("Currently tracked URLs by channel:\n");
        for (destination, urls) in by_destination {
            reply.push_str(&format!("\n{}:\n", DestinationKind::label(&destination)));
            for url in urls {
                reply.push_str(&format!("- {url}\n"));
            }
        }
        Ok(reply)
    }
}

fn usage(name: &str, takes_url: bool) -> AppError {
    if takes_url {
        AppError::command(format!("Usage: {PREFIX}{name} <url> [#channel]"))
    } else {
        AppError::command(format!("Usage: {PREFIX}{name} [#channel]"))
    }
}

fn url_and_destination(args: &[&str], name: &str) -> Result<(String, Option<String>)> {
    match args {
        [url] => Ok((url.to_string(), None)),
        [url, destination] => Ok((url.to_string(), Some(parse_destination(destination)?))),
        _ => Err(usage(name, true)),
    }
}

/// Accepts a channel mention (`<#123>`), a raw channel id, or a webhook URL.
pub fn parse_destination(arg: &str) -> Result<String> {
    let mention = CHANNEL_MENTION
        .as_ref()
        .and_then(|re| re.captures(arg))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    if let Some(id) = mention {
        return Ok(id);
    }

    match DestinationKind::of(arg) {
        DestinationKind::Channel(_) | DestinationKind::Webhook(_) => Ok(arg.to_string()),
        DestinationKind::Unknown => Err(AppError::command(format!(
            "Unrecognized channel '{arg}'. Use a #channel mention, a channel id or a webhook URL."
        ))),
    }
}
