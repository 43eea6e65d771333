use crate::protocol::ChatEvent;
use std::sync::Mutex;

/// What [`SessionTracker::observe`] learned from one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionObservation {
    /// A `session_created` event; `replaced` is the session it superseded.
    Created { id: String, replaced: Option<String> },
    Matched,
    Mismatch { active: String, received: String },
    /// No session on the event, no active session, or an error event.
    Unscoped,
}

/// Remembers the server-assigned session id.
#[derive(Debug, Default)]
pub struct SessionTracker {
    active: Mutex<Option<String>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, event: &ChatEvent) -> SessionObservation {
        let Ok(mut active) = self.active.lock() else {
            return SessionObservation::Unscoped;
        };
        match event {
            ChatEvent::SessionCreated { session_id, .. } => {
                let replaced = active.replace(session_id.clone());
                SessionObservation::Created {
                    id: session_id.clone(),
                    replaced,
                }
            }
            // Errors may name a session the server just gave up on.
            ChatEvent::Error { .. } => SessionObservation::Unscoped,
            other => match (active.as_deref(), other.session_id()) {
                (Some(current), Some(received)) if current == received => {
                    SessionObservation::Matched
                }
                (Some(current), Some(received)) => SessionObservation::Mismatch {
                    active: current.to_string(),
                    received: received.to_string(),
                },
                _ => SessionObservation::Unscoped,
            },
        }
    }

    pub fn current(&self) -> Option<String> {
        self.active.lock().ok().and_then(|g| g.clone())
    }

    /// Forget the active session, returning it.
    pub fn reset(&self) -> Option<String> {
        self.active.lock().ok().and_then(|mut g| g.take())
    }
}
