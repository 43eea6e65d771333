use std::collections::VecDeque;

/// Longest frame excerpt kept in a [`Diagnostic::DecodeFailed`].
const FRAME_EXCERPT_CHARS: usize = 256;

pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 256;

/// Non-fatal problems that never reach the chat feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// An inbound frame was dropped.
    DecodeFailed { reason: String, frame: String },
    /// A frame was produced while no socket was open and went nowhere.
    SendWhileDisconnected { kind: &'static str },
    EmptyMessage,
    Transport { detail: String },
    /// A session-scoped event named a session other than the active one.
    SessionMismatch { active: String, received: String },
}

impl Diagnostic {
    pub fn decode_failed(reason: impl ToString, frame: &str) -> Self {
        Diagnostic::DecodeFailed {
            reason: reason.to_string(),
            frame: excerpt(frame),
        }
    }

    pub fn log(&self) {
        match self {
            Diagnostic::DecodeFailed { reason, frame } => {
                log::warn!("[chat] dropped undecodable frame: {} ({})", reason, frame)
            }
            Diagnostic::SendWhileDisconnected { kind } => {
                log::error!("[chat] websocket not connected, {} not sent", kind)
            }
            Diagnostic::EmptyMessage => log::warn!("[chat] ignoring empty message"),
            Diagnostic::Transport { detail } => log::warn!("[chat] transport error: {}", detail),
            Diagnostic::SessionMismatch { active, received } => log::warn!(
                "[session] event for session {} while {} is active",
                received,
                active
            ),
        }
    }
}

fn excerpt(frame: &str) -> String {
    match frame.char_indices().nth(FRAME_EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &frame[..idx]),
        None => frame.to_string(),
    }
}

/// Bounded ring of recent diagnostics; the oldest entry is evicted first.
#[derive(Debug)]
pub struct DiagnosticLog {
    entries: VecDeque<Diagnostic>,
    capacity: usize,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_DIAGNOSTICS_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(diagnostic);
    }

    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}
