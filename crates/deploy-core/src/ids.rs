//! Type-safe identifiers for sessions and deployments.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Identifies one client's logical connection across reconnects.
///
/// A browser tab or watch client keeps the same `SessionId` when its
/// transport drops and is re-established, which is what lets a progress
/// update find the replacement connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a SessionId, rejecting empty or whitespace-only input.
    pub fn parse(id: &str) -> DomainResult<Self> {
        if id.trim().is_empty() {
            return Err(DomainError::EmptyIdentifier {
                field: "session_id".to_string(),
            });
        }
        Ok(Self(id.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a single deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a DeploymentId, rejecting empty or whitespace-only input.
    pub fn parse(id: &str) -> DomainResult<Self> {
        if id.trim().is_empty() {
            return Err(DomainError::EmptyIdentifier {
                field: "deployment_id".to_string(),
            });
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeploymentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeploymentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parse_rejects_blank() {
        assert!(SessionId::parse("   ").is_err());
        assert_eq!(SessionId::parse("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_session_id_short() {
        let id = SessionId::new("8e11bfb5-7dc2-432b-9206-928fa5c35731");
        assert_eq!(id.short(), "8e11bfb5");
        assert_eq!(SessionId::new("tiny").short(), "tiny");
    }

    #[test]
    fn test_ids_serialize_transparent() {
        let id = DeploymentId::new("dep-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"dep-42\"");
    }
}
