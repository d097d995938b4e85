use bridge_traits::BridgeError;
use thiserror::Error;

use crate::state::{SessionEvent, SessionState};

#[derive(Error, Debug)]
pub enum AuthError {
    /// No response was obtained. Never triggers a refresh.
    #[error("Transport error: {0}")]
    Transport(#[from] BridgeError),

    /// The refresh episode this request waited on failed. Cleanup has
    /// already happened centrally.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[from] RefreshFailure),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Login failed ({status}): {message}")]
    LoginFailed { status: u16, message: String },

    #[error("Invalid session transition: {event} while {from}")]
    InvalidTransition {
        from: SessionState,
        event: SessionEvent,
    },

    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Credential store already initialized")]
    AlreadyInitialized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Outcome shared by every caller of one failed refresh episode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh token rejected ({status})")]
    Rejected { status: u16 },

    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),

    #[error("transport error during refresh: {0}")]
    Transport(String),

    #[error("refresh timed out")]
    Timeout,

    #[error("refresh abandoned before it settled")]
    Abandoned,

    #[error("session changed while refreshing")]
    Superseded,
}

pub type Result<T> = std::result::Result<T, AuthError>;
