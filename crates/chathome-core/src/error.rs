//! Caller-facing error taxonomy for the chat pipeline.
//!
//! `NotFound` covers both "does not exist" and "belongs to someone else";
//! the two are never distinguished in anything returned to a caller.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Missing, malformed, expired, or unresolvable credential.
    #[error("authentication required")]
    Unauthenticated,

    #[error("resource not found")]
    NotFound,

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),
}

impl ChatError {
    /// Stable machine-readable reason string.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Unauthenticated => "unauthenticated",
            ChatError::NotFound => "not_found",
            ChatError::ValidationFailed(_) => "validation_failed",
            ChatError::UpstreamUnavailable(_) => "upstream_unavailable",
            ChatError::PersistenceFailed(_) => "persistence_failed",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::ValidationFailed(msg.into())
    }

    /// Wrap a storage error, keeping its full chain in the message.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        ChatError::PersistenceFailed(format!("{:#}", err))
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        ChatError::UpstreamUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ChatError::Unauthenticated.code(), "unauthenticated");
        assert_eq!(ChatError::NotFound.code(), "not_found");
        assert_eq!(ChatError::validation("x").code(), "validation_failed");
        assert_eq!(ChatError::upstream("x").code(), "upstream_unavailable");
        assert_eq!(ChatError::persistence("x").code(), "persistence_failed");
    }

    #[test]
    fn persistence_keeps_anyhow_chain() {
        let err = anyhow::anyhow!("disk full").context("insert message");
        let mapped = ChatError::persistence(err);
        assert_eq!(
            mapped,
            ChatError::PersistenceFailed("insert message: disk full".into())
        );
    }
}
