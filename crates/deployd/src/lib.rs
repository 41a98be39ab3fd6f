//! Deployment progress daemon
//!
//! This crate provides the delivery side of deployment progress reporting:
//! - `notifier` - Best-effort, reconnect-tolerant progress notifier
//! - `connection` / `resolver` - What the notifier sends to and how it finds it
//! - `registry` - Process-wide session → connection map
//! - `server` - Unix socket server that owns the registry's writes
//! - `pipeline` - Demo pipeline driving a notifier through all stages
//! - `config` - TOML configuration
//! - `daemon` - PID file and signal helpers for the `deployd` binary
//!
//! # Architecture
//!
//! ```text
//! pipeline stage ──▶ Notifier ──resolve──▶ ConnectionRegistry ◀──register── SessionHandler
//!                        │                                                        │
//!                        └──────────── send_json ──▶ SocketConnection ◀── owns ───┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows a panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Notification failures are logged, never propagated

pub mod config;
pub mod connection;
pub mod daemon;
pub mod notifier;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod server;

pub use config::{DaemonConfig, NotifierConfig};
pub use connection::{ConnectionHandle, ConnectionState, SendError, SharedConnection};
pub use notifier::{DeliveryError, DeliveryOutcome, Notifier};
pub use registry::{ConnectionRegistry, ConnectionToken};
pub use resolver::{ConnectionResolver, FixedConnection};
