use crate::channel::{MessageChannel, SendOutcome};
use crate::connection::{ConnectionManager, ConnectionPhase};
use crate::diagnostics::Diagnostic;
use crate::error::{ClientError, VoiceUploadError};
use crate::protocol::ChatEvent;
use crate::settings::ClientSettings;
use crate::state::{ChatState, ClientEvent};
use crate::voice::VoiceUploader;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Realtime chat client: one reconnecting socket, a typed event feed and a
/// voice-note sidecar.
///
/// Nothing here returns an error once constructed. Send problems land in
/// [`ChatClient::diagnostics`], upload failures land in the feed as
/// [`ChatEvent::Error`]. `connect` must be called from inside a tokio runtime.
pub struct ChatClient {
    state: Arc<ChatState>,
    channel: MessageChannel,
    uploader: VoiceUploader,
    manager: Mutex<ConnectionManager>,
}

impl ChatClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        let upload_url = settings.voice_upload_url()?;
        // Validate the socket address shape up front.
        settings.chat_socket_url("user", "token")?;
        let uploader = VoiceUploader::new(upload_url, settings.upload_timeout())?;
        let state = Arc::new(ChatState::new(settings.diagnostics_capacity));
        let manager = ConnectionManager::new(state.clone(), Arc::new(settings));
        Ok(Self {
            channel: MessageChannel::new(state.clone()),
            state,
            uploader,
            manager: Mutex::new(manager),
        })
    }

    /// Build and immediately connect.
    pub fn start(
        settings: ClientSettings,
        identity: &str,
        credential: &str,
    ) -> Result<Self, ClientError> {
        let client = Self::new(settings)?;
        client.connect(identity, credential);
        Ok(client)
    }

    pub fn connect(&self, identity: &str, credential: &str) {
        if let Ok(mut manager) = self.manager.lock() {
            manager.connect(identity, credential);
        }
    }

    pub fn disconnect(&self) {
        if let Ok(mut manager) = self.manager.lock() {
            manager.disconnect();
        }
    }

    /// Disconnect and wait until the socket is closed.
    pub async fn close(&self) {
        let finished = match self.manager.lock() {
            Ok(mut manager) => Some(manager.shutdown()),
            Err(_) => None,
        };
        if let Some(finished) = finished {
            finished.await;
        }
    }

    pub fn send(&self, content: &str) -> SendOutcome {
        self.channel.send(content)
    }

    pub fn send_typing(&self, active: bool) -> SendOutcome {
        self.channel.send_typing(active)
    }

    /// Upload a recorded voice note. Always completes; a failure becomes one
    /// error event in the feed.
    pub async fn upload_voice(&self, audio: Vec<u8>) {
        let session_id = self.state.session.current();
        let credential = self
            .manager
            .lock()
            .ok()
            .and_then(|m| m.credentials().map(|c| c.credential().to_string()));

        let result = match credential {
            Some(credential) => {
                self.uploader
                    .upload(audio, session_id.as_deref(), &credential)
                    .await
            }
            None => Err(VoiceUploadError::MissingCredential),
        };

        match result {
            Ok(receipt) => log::info!(
                "[voice] upload accepted by {}: {}",
                self.uploader.endpoint(),
                receipt.raw
            ),
            Err(e) => {
                log::error!("[voice] error uploading voice: {}", e);
                self.state.append(ChatEvent::upload_failure(e.to_string()));
            }
        }
    }

    /// Empty the feed and forget the session; the socket stays as it is.
    pub fn clear_messages(&self) {
        self.state.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase()
    }

    pub fn messages(&self) -> Vec<ChatEvent> {
        self.state.messages()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.session.current()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.state.diagnostics()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UPLOAD_FAILURE_SUMMARY;

    #[test]
    fn send_while_offline_echoes_once() {
        let client = ChatClient::new(ClientSettings::default()).unwrap();
        assert_eq!(client.send("hello"), SendOutcome::NotConnected);

        let feed = client.messages();
        assert_eq!(feed.len(), 1);
        assert!(matches!(
            &feed[0],
            ChatEvent::TextMessage { content, .. } if content == "hello"
        ));
        assert!(!client.is_connected());
        assert_eq!(client.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn invalid_server_url_fails_construction() {
        let settings = ClientSettings {
            server_url: "gopher://nowhere".into(),
            ..Default::default()
        };
        assert!(matches!(
            ChatClient::new(settings),
            Err(ClientError::Settings(_))
        ));
    }

    #[tokio::test]
    async fn upload_without_credential_reports_in_feed() {
        let client = ChatClient::new(ClientSettings::default()).unwrap();
        client.upload_voice(vec![1, 2, 3]).await;

        let feed = client.messages();
        assert_eq!(feed.len(), 1);
        match &feed[0] {
            ChatEvent::Error { error, details, .. } => {
                assert_eq!(error, UPLOAD_FAILURE_SUMMARY);
                assert!(details.as_deref().unwrap().contains("credential"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn clear_messages_empties_feed() {
        let client = ChatClient::new(ClientSettings::default()).unwrap();
        client.send("one");
        client.send("two");
        client.clear_messages();
        assert!(client.messages().is_empty());
        assert_eq!(client.session_id(), None);
    }
}
