use reqwest::StatusCode;
use thiserror::Error;

/// Why an inbound frame could not be turned into a [`crate::protocol::ChatEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid chat frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary frame ({len} bytes) is not a chat event")]
    Binary { len: usize },
}

/// A failed attempt to open the chat socket. Always followed by a retry.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("websocket connect timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum VoiceUploadError {
    #[error("no credential available for upload")]
    MissingCredential,
    #[error("upload request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("upload response was not JSON: {0}")]
    InvalidBody(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to resolve data directory")]
    NoDataDir,
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid server url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported url scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),
}

/// Failures while building a [`crate::ChatClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}
