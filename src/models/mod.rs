// src/models/mod.rs

//! Domain models for the event watcher.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
mod payload;
mod tracker;

// Re-export all public types
pub use config::{Config, DeliveryConfig, PollConfig, SourceConfig, StorageConfig};
pub use event::{EventRecord, localize};
pub use payload::{Embed, EmbedFooter, EmbedImage, NotificationPayload};
pub use tracker::{DestinationKind, ProcessedEvent, Tracker};
