//! Realtime chat transport client.
//!
//! A [`ChatClient`] keeps one authenticated websocket open to the chat
//! backend, reconnects after a fixed delay when it drops, tracks the
//! server-assigned session, and uploads voice notes over HTTP.

pub mod channel;
pub mod client;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod state;
pub mod voice;

/// Sent on the socket handshake and on uploads.
pub(crate) const CLIENT_USER_AGENT: &str = concat!("chatwire/", env!("CARGO_PKG_VERSION"));

pub use channel::SendOutcome;
pub use client::ChatClient;
pub use connection::ConnectionPhase;
pub use diagnostics::Diagnostic;
pub use error::{ClientError, ConnectError, DecodeError, SettingsError, VoiceUploadError};
pub use protocol::{ChatEvent, OutgoingFrame};
pub use settings::ClientSettings;
pub use state::ClientEvent;
