//! Error taxonomy for the sync engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or channel failure.  Recovered by retrying, never fatal.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status and a reason.
    #[error("rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// Inbound payload that does not parse as a state update.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid backend url: {0}")]
    InvalidUrl(String),

    /// The session this result belonged to is gone.
    #[error("session closed")]
    SessionClosed,
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::Transport(format!("undecodable response: {}", e))
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
