//! Outbound chat frames and inbound frame decoding.

use crate::diagnostics::Diagnostic;
use crate::error::DecodeError;
use crate::protocol::{decode_frame, ChatEvent, OutgoingFrame};
use crate::state::ChatState;
use std::sync::Arc;
use tokio_tungstenite::tungstenite;

/// What happened to a `send`. Informational; sending never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Transmitted,
    NotConnected,
    /// Nothing to send (blank content, or a typing indicator outside a session).
    Empty,
}

#[derive(Clone)]
pub struct MessageChannel {
    state: Arc<ChatState>,
}

impl MessageChannel {
    pub fn new(state: Arc<ChatState>) -> Self {
        Self { state }
    }

    /// Send a text message tagged with the active session. The local copy is
    /// appended to the feed whether or not a socket is open.
    pub fn send(&self, content: &str) -> SendOutcome {
        if content.trim().is_empty() {
            self.state.record(Diagnostic::EmptyMessage);
            return SendOutcome::Empty;
        }
        let session_id = self.state.session.current();
        let frame = OutgoingFrame::TextMessage {
            content: content.to_string(),
            session_id: session_id.clone(),
        };
        let outcome = self.dispatch(frame);
        self.state
            .append(ChatEvent::local_text(content, session_id));
        outcome
    }

    pub fn send_typing(&self, active: bool) -> SendOutcome {
        let Some(session_id) = self.state.session.current() else {
            return SendOutcome::Empty;
        };
        self.dispatch(OutgoingFrame::Typing {
            status: active,
            session_id,
        })
    }

    fn dispatch(&self, frame: OutgoingFrame) -> SendOutcome {
        match self.state.transmit(frame) {
            Ok(()) => SendOutcome::Transmitted,
            Err(frame) => {
                self.state
                    .record(Diagnostic::SendWhileDisconnected { kind: frame.kind() });
                SendOutcome::NotConnected
            }
        }
    }

    /// Decode one inbound text frame into the feed. Undecodable frames are
    /// dropped into diagnostics.
    pub fn receive_text(&self, text: &str) -> Result<(), DecodeError> {
        match decode_frame(text) {
            Ok(event) => {
                log::debug!("[chat] received {}", event.kind());
                self.state.ingest(event);
                Ok(())
            }
            Err(e) => {
                self.state.record(Diagnostic::decode_failed(&e, text));
                Err(e)
            }
        }
    }

    /// Route a data frame from the socket. Control frames are the
    /// connection's business and are ignored here.
    pub fn receive(&self, msg: &tungstenite::Message) -> Result<(), DecodeError> {
        match msg {
            tungstenite::Message::Text(text) => self.receive_text(text.as_str()),
            tungstenite::Message::Binary(data) => {
                let err = DecodeError::Binary { len: data.len() };
                self.state.record(Diagnostic::decode_failed(&err, ""));
                Err(err)
            }
            _ => Ok(()),
        }
    }
}
