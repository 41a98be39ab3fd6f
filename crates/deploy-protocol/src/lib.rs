//! Deploy Protocol - Wire protocol for progress delivery
//!
//! This crate provides the message types exchanged between the
//! daemon and connected clients: the `deployment_progress` envelope
//! pushed by the notifier, plus the small session handshake that lets
//! a client identify itself across reconnects.

pub mod event;
pub mod message;
pub mod version;

pub use event::{Details, ProgressEvent};
pub use message::{ClientMessage, MessageType, ServerMessage};
pub use version::ProtocolVersion;
