use crate::connection::ConnectionPhase;
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::protocol::{ChatEvent, OutgoingFrame};
use crate::session::{SessionObservation, SessionTracker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

const UPDATE_BUFFER: usize = 256;

/// Change notifications for whatever renders the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connection(bool),
    Phase(ConnectionPhase),
    Appended(ChatEvent),
    Cleared,
    Session(Option<String>),
    Diagnostic(Diagnostic),
}

/// Observable model shared by the connection task, the message channel and
/// the voice sidecar.
pub struct ChatState {
    connected: AtomicBool,
    phase: Mutex<ConnectionPhase>,
    events: Mutex<Vec<ChatEvent>>,
    pub session: SessionTracker,
    diagnostics: Mutex<DiagnosticLog>,
    /// Write half of the live socket's queue; `None` while disconnected.
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<OutgoingFrame>>>,
    updates: broadcast::Sender<ClientEvent>,
}

impl ChatState {
    pub fn new(diagnostics_capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            connected: AtomicBool::new(false),
            phase: Mutex::new(ConnectionPhase::Disconnected),
            events: Mutex::new(Vec::new()),
            session: SessionTracker::new(),
            diagnostics: Mutex::new(DiagnosticLog::new(diagnostics_capacity)),
            outbound_tx: Mutex::new(None),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.updates.subscribe()
    }

    fn notify(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.updates.send(event);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            self.notify(ClientEvent::Connection(connected));
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
            .lock()
            .map(|p| *p)
            .unwrap_or(ConnectionPhase::Disconnected)
    }

    pub fn set_phase(&self, phase: ConnectionPhase) {
        let changed = match self.phase.lock() {
            Ok(mut current) if *current != phase => {
                *current = phase;
                true
            }
            _ => false,
        };
        if changed {
            self.notify(ClientEvent::Phase(phase));
        }
    }

    pub fn messages(&self) -> Vec<ChatEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn append(&self, event: ChatEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        self.notify(ClientEvent::Appended(event));
    }

    /// Route an inbound event through the session tracker, then append it.
    pub fn ingest(&self, event: ChatEvent) {
        match self.session.observe(&event) {
            SessionObservation::Created { id, replaced } => {
                match replaced {
                    Some(old) if old != id => {
                        log::info!("[session] session {} replaced by {}", old, id)
                    }
                    Some(_) => {}
                    None => log::info!("[session] session created: {}", id),
                }
                self.notify(ClientEvent::Session(Some(id)));
            }
            SessionObservation::Mismatch { active, received } => {
                self.record(Diagnostic::SessionMismatch { active, received });
            }
            SessionObservation::Matched | SessionObservation::Unscoped => {}
        }
        self.append(event);
    }

    /// Empty the feed and forget the session. The socket is left alone.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
        self.notify(ClientEvent::Cleared);
        self.forget_session();
    }

    pub fn forget_session(&self) {
        if self.session.reset().is_some() {
            self.notify(ClientEvent::Session(None));
        }
    }

    pub fn record(&self, diagnostic: Diagnostic) {
        diagnostic.log();
        if let Ok(mut log) = self.diagnostics.lock() {
            log.push(diagnostic.clone());
        }
        self.notify(ClientEvent::Diagnostic(diagnostic));
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .map(|d| d.snapshot())
            .unwrap_or_default()
    }

    pub fn install_outbound(&self, tx: mpsc::UnboundedSender<OutgoingFrame>) {
        if let Ok(mut slot) = self.outbound_tx.lock() {
            *slot = Some(tx);
        }
    }

    pub fn clear_outbound(&self) {
        if let Ok(mut slot) = self.outbound_tx.lock() {
            *slot = None;
        }
    }

    /// Hand a frame to the live socket. Gives the frame back when there is none.
    pub fn transmit(&self, frame: OutgoingFrame) -> Result<(), OutgoingFrame> {
        if !self.is_connected() {
            return Err(frame);
        }
        let Ok(slot) = self.outbound_tx.lock() else {
            return Err(frame);
        };
        match slot.as_ref() {
            Some(tx) => tx.send(frame).map_err(|e| e.0),
            None => Err(frame),
        }
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(crate::diagnostics::DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}
