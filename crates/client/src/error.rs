use thiserror::Error;

use crate::edit::EditError;
use crate::voice::CaptureError;

/// Errors surfaced by the client engine
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} returned status {status}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No active session")]
    NoActiveSession,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("A generation or edit is already in flight")]
    Busy,

    #[error("Message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Failed to read config: {0}")]
    ConfigRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
