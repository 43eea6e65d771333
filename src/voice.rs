//! Voice notes go over plain HTTP, not the chat socket.

use crate::error::VoiceUploadError;
use crate::CLIENT_USER_AGENT;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

pub const VOICE_FILE_NAME: &str = "voice.webm";
const VOICE_MIME: &str = "audio/webm";

/// The upload response. No schema is enforced; well-known fields are picked
/// out when present and the whole body is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub session_id: Option<String>,
    pub transcription: Option<String>,
    pub ai_response: Option<String>,
    pub language: Option<String>,
    pub tts_audio_url: Option<String>,
    pub raw: Value,
}

impl UploadReceipt {
    pub fn from_json(raw: Value) -> Self {
        let field = |name: &str| raw.get(name).and_then(|v| v.as_str()).map(str::to_string);
        Self {
            session_id: field("session_id"),
            transcription: field("transcription"),
            ai_response: field("ai_response"),
            language: field("language"),
            tts_audio_url: field("tts_audio_url"),
            raw,
        }
    }
}

pub struct VoiceUploader {
    http: reqwest::Client,
    endpoint: Url,
}

impl VoiceUploader {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(CLIENT_USER_AGENT)
            .build()?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST one recording as multipart `file` (+ `session_id`) with bearer auth.
    pub async fn upload(
        &self,
        audio: Vec<u8>,
        session_id: Option<&str>,
        credential: &str,
    ) -> Result<UploadReceipt, VoiceUploadError> {
        if credential.is_empty() {
            return Err(VoiceUploadError::MissingCredential);
        }
        let size = audio.len();
        let file = Part::bytes(audio)
            .file_name(VOICE_FILE_NAME)
            .mime_str(VOICE_MIME)
            .map_err(VoiceUploadError::Transport)?;
        let mut form = Form::new().part("file", file);
        if let Some(session_id) = session_id {
            form = form.text("session_id", session_id.to_string());
        }

        log::info!(
            "[voice] uploading {} bytes (session={})",
            size,
            session_id.unwrap_or("-")
        );
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(credential)
            .multipart(form)
            .send()
            .await
            .map_err(VoiceUploadError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceUploadError::Rejected { status, body });
        }
        let body: Value = response
            .json()
            .await
            .map_err(VoiceUploadError::InvalidBody)?;
        Ok(UploadReceipt::from_json(body))
    }
}
