//! Unified error handling for the client.

use crate::config::ConfigError;
use comanda_engine::Version;
use serde::Serialize;
use std::fmt;

/// Details of a rejected version-guarded mutation (HTTP 409).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub message: String,
    /// The server's authoritative version
    pub server_version: Option<Version>,
    /// The version the client attempted
    pub client_version: Option<Version>,
    /// Raw response body
    pub payload: serde_json::Value,
}

impl fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        match (self.client_version, self.server_version) {
            (Some(client), Some(server)) => write!(f, " (client v{client}, server v{server})"),
            (None, Some(server)) => write!(f, " (server v{server})"),
            _ => Ok(()),
        }
    }
}

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Local validation or business rule failure, raised before any request
    #[error(transparent)]
    Engine(#[from] comanda_engine::Error),

    #[error("Version conflict: {0}")]
    Conflict(ConflictInfo),

    /// No response: connect failure, timeout, broken body
    #[error("Network error: {0}")]
    Network(String),

    /// Retryable HTTP status (408, 429, 503, 504)
    #[error("Transient HTTP {status}: {message}")]
    Transient { status: u16, message: String },

    /// Non-retryable HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Circuit open, retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if err.is_builder() {
            ClientError::Config(ConfigError::Invalid {
                name: "COMANDA_API_URL",
                value: err.to_string(),
            })
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl ClientError {
    /// Worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::Transient { .. })
    }

    /// Counts against the circuit breaker when surfaced.
    pub fn charges_circuit(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Transient { .. } => true,
            ClientError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status behind the error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Conflict(_) => Some(409),
            ClientError::Transient { status, .. } | ClientError::Http { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }

    /// Message suitable for an operator facing screen.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Engine(err) => err.message().to_string(),
            ClientError::Conflict(_) => {
                "This order was changed by another user. Refreshing data.".to_string()
            }
            ClientError::CircuitOpen { .. } => {
                "Service temporarily unavailable. Try again in a few moments.".to_string()
            }
            ClientError::Network(_) => {
                "No connection to the server. Check your network.".to_string()
            }
            ClientError::Transient { status, message } | ClientError::Http { status, message } => {
                match status {
                    400 | 422 if !message.is_empty() => message.clone(),
                    400 | 422 => "Invalid data.".to_string(),
                    401 => "Session expired. Please sign in again.".to_string(),
                    403 => "You do not have permission for this operation.".to_string(),
                    404 => "Order not found.".to_string(),
                    408 => "The server took too long to answer.".to_string(),
                    429 => "Too many requests. Wait a moment.".to_string(),
                    502..=504 => {
                        "Service temporarily unavailable. Try again in a few moments.".to_string()
                    }
                    _ if *status >= 500 => "Server error. Try again later.".to_string(),
                    _ => format!("Request failed ({status})."),
                }
            }
            ClientError::Decode(_) => "Unexpected response from the server.".to_string(),
            ClientError::Config(err) => err.to_string(),
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
