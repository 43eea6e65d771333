//! Wire format of the chat socket.
//!
//! Every frame is a UTF-8 JSON object whose `type` field selects the variant.
//! Inbound frames decode into [`ChatEvent`]; the client only ever writes
//! [`OutgoingFrame`]s.

use crate::error::DecodeError;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Summary text of the error event appended when a voice upload fails.
pub const UPLOAD_FAILURE_SUMMARY: &str = "Failed to upload voice note";

/// One entry of the event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A user message: the local optimistic copy or a server relay.
    TextMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Assistant reply.
    AiMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        /// Synthesized speech for the reply, when the backend produced one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tts_audio_url: Option<String>,
    },
    /// The server opened a conversation; its id tags everything after it.
    SessionCreated {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Transcript of an uploaded voice note.
    VoiceTranscription {
        transcription: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// A failure reported by the server or synthesized by the client.
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl ChatEvent {
    /// Wire name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::TextMessage { .. } => "text_message",
            ChatEvent::AiMessage { .. } => "ai_message",
            ChatEvent::SessionCreated { .. } => "session_created",
            ChatEvent::VoiceTranscription { .. } => "voice_transcription",
            ChatEvent::Error { .. } => "error",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            ChatEvent::TextMessage { session_id, .. }
            | ChatEvent::AiMessage { session_id, .. }
            | ChatEvent::VoiceTranscription { session_id, .. }
            | ChatEvent::Error { session_id, .. } => session_id.as_deref(),
            ChatEvent::SessionCreated { session_id, .. } => Some(session_id),
        }
    }

    /// The optimistic copy of a message this client just sent.
    pub fn local_text(content: &str, session_id: Option<String>) -> Self {
        ChatEvent::TextMessage {
            content: content.to_string(),
            session_id,
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    pub fn upload_failure(details: impl Into<String>) -> Self {
        ChatEvent::Error {
            error: UPLOAD_FAILURE_SUMMARY.to_string(),
            details: Some(details.into()),
            session_id: None,
        }
    }
}

/// Frames the client writes to the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingFrame {
    TextMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Typing indicator; the backend only accepts it inside a session.
    Typing { status: bool, session_id: String },
}

impl OutgoingFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            OutgoingFrame::TextMessage { .. } => "text_message",
            OutgoingFrame::Typing { .. } => "typing",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse one text frame.
pub fn decode_frame(text: &str) -> Result<ChatEvent, DecodeError> {
    Ok(serde_json::from_str(text)?)
}
