// src/lib.rs

//! eventwatch: Eventbrite listing watcher and chat announcer library

pub mod commands;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod transport;
pub mod utils;
