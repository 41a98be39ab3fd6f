//! Deploy Core - Shared types for deployment progress notification
//!
//! This crate provides the domain types shared between
//! the daemon (deployd) and the watch client (deploy-watch).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod ids;
pub mod stage;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use ids::{DeploymentId, SessionId};
pub use stage::{Stage, StageStatus};
