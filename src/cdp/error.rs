//! DevTools connection error types.

use thiserror::Error;

/// Errors produced by the DevTools connection.
#[derive(Debug, Error)]
pub enum CdpError {
    /// Failed to reach the browser's debugging endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The browser's page listing contained no active tab.
    #[error("no active tab found")]
    NoActiveTab,

    /// A reply or listing was missing a required field.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The browser answered an RPC with an error envelope.
    #[error("protocol error: {message} (code {code})")]
    Protocol { code: i64, message: String },

    /// The connection has been closed; no further operations are possible.
    #[error("connection closed")]
    Closed,

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// HTTP error during endpoint discovery.
    #[error("http error: {0}")]
    Http(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for CdpError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CdpError::WebSocket(e.to_string())
    }
}

impl From<reqwest::Error> for CdpError {
    fn from(e: reqwest::Error) -> Self {
        CdpError::Http(e.to_string())
    }
}
