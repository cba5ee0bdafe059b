/// Error types for the inbox sync core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unauthorized (status {status}), login required at {login_path}")]
    Unauthorized { status: u16, login_path: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session closed")]
    SessionClosed,
}

impl InboxError {
    /// Message suitable for showing next to the failed action.
    ///
    /// Non-2xx responses surface the server's body text when it has one.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            InboxError::Status { body, .. } if !body.trim().is_empty() => body.trim().to_string(),
            InboxError::Status { .. } => fallback.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, InboxError::Unauthorized { .. })
            || matches!(self, InboxError::Status { status, .. } if *status == 401 || *status == 403)
    }
}

pub type Result<T> = std::result::Result<T, InboxError>;
