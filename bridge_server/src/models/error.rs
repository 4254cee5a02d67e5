//! Error taxonomy shared by every service.
//!
//! Four kinds matter to callers: `User` faults surface on the commit status
//! with their message, `Transport` faults are retried where a retry policy
//! exists, `Storage`/`Internal` faults are logged with detail locally and
//! surface to the user only as a generic "internal error". `NotFound` is an
//! expected control-flow outcome, never logged as unexpected.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// A configuration mistake on the user's end (malformed manifest,
    /// insufficient OAuth grant). The message is shown on the commit status.
    #[error("{0}")]
    User(String),

    /// The requested record or file does not exist.
    #[error("resource not found")]
    NotFound,

    /// The installation store is unavailable.
    #[error("storage unavailable: {0}")]
    Storage(#[from] sqlx::Error),

    /// A network or API transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Anything unexpected. Detail stays in the logs.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn user(msg: impl Into<String>) -> Self {
        Self::User(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(msg.into()))
    }

    /// The message to put on a failing commit status, if this error is the
    /// user's to fix. Internal detail is never exposed this way.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::User(msg) => Some(msg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_only_for_user_errors() {
        assert_eq!(
            BridgeError::user("bad manifest").user_message(),
            Some("bad manifest")
        );
        assert_eq!(BridgeError::NotFound.user_message(), None);
        assert_eq!(
            BridgeError::internal("pool exhausted").user_message(),
            None
        );
    }
}
