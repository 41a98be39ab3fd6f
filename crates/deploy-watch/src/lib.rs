//! deploy-watch - follows a deployment session on the progress daemon.
//!
//! A [`WatchClient`] holds one session open on the daemon socket,
//! reconnecting with exponential backoff, and forwards what it receives as
//! [`WatchEvent`]s over an mpsc channel. [`render::format_event`] turns
//! each event into a single line for a terminal.

pub mod client;
pub mod error;
pub mod render;

pub use client::{SimulateRequest, WatchClient, WatchConfig, WatchEvent};
pub use error::{Result, WatchError};
