//! Socket lifecycle: connect, watch for closure, reconnect after a fixed
//! delay, and tear down on request.

use crate::channel::MessageChannel;
use crate::diagnostics::Diagnostic;
use crate::error::ConnectError;
use crate::protocol::OutgoingFrame;
use crate::settings::ClientSettings;
use crate::state::ChatState;
use crate::CLIENT_USER_AGENT;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::{connect_async, tungstenite};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    /// Closed without disposal; a reconnect timer is pending.
    Reconnecting,
    /// Disposed. Terminal.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSignal {
    Connect,
    Opened,
    /// Socket closed, errored fatally, or the attempt failed.
    Lost,
    TimerFired,
    Dispose,
}

impl ConnectionPhase {
    /// The guarded transition table. `None` means the signal is rejected.
    pub fn next(self, signal: PhaseSignal) -> Option<ConnectionPhase> {
        use ConnectionPhase::*;
        use PhaseSignal::*;
        match (self, signal) {
            (Closed, _) => None,
            (_, Dispose) => Some(Closed),
            (Disconnected, Connect) => Some(Connecting),
            (Connecting, Opened) => Some(Connected),
            (Connecting | Connected, Lost) => Some(Reconnecting),
            (Reconnecting, TimerFired) => Some(Connecting),
            _ => None,
        }
    }
}

struct PhaseMachine {
    phase: ConnectionPhase,
    state: Arc<ChatState>,
}

impl PhaseMachine {
    fn new(state: Arc<ChatState>) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            state,
        }
    }

    fn fire(&mut self, signal: PhaseSignal) -> bool {
        match self.phase.next(signal) {
            Some(next) => {
                self.phase = next;
                self.state.set_phase(next);
                true
            }
            None => {
                log::debug!("[chat] ignoring {:?} while {:?}", signal, self.phase);
                false
            }
        }
    }
}

/// A single pending reconnect. Dropping it cancels it.
#[derive(Debug)]
pub struct ReconnectTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    /// Must be called inside a tokio runtime.
    pub fn schedule(delay: Duration) -> Self {
        Self {
            sleep: Some(Box::pin(tokio::time::sleep(delay))),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves `true` when the delay elapses, or `false` at once if the
    /// timer was cancelled or already fired.
    pub async fn fired(&mut self) -> bool {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
                true
            }
            None => false,
        }
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }
}

/// Identity plus opaque credential. The credential is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identity: String,
    credential: String,
}

impl Credentials {
    /// `None` when either part is empty.
    pub fn new(identity: &str, credential: &str) -> Option<Self> {
        if identity.is_empty() || credential.is_empty() {
            return None;
        }
        Some(Self {
            identity: identity.to_string(),
            credential: credential.to_string(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("credential", &"<redacted>")
            .finish()
    }
}

fn redacted(endpoint: &Url) -> String {
    let mut url = endpoint.clone();
    if url.query().is_some() {
        url.set_query(Some("token=<redacted>"));
    }
    url.to_string()
}

fn build_ws_request(
    endpoint: &Url,
) -> Result<tungstenite::http::Request<()>, tungstenite::Error> {
    let mut request = endpoint.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
    Ok(request)
}

async fn open_socket(endpoint: &Url) -> Result<WsStream, ConnectError> {
    let request = build_ws_request(endpoint)?;
    match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request)).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ConnectError::TimedOut(CONNECT_TIMEOUT)),
    }
}

/// Send errors that reject one frame but leave the socket writable.
fn is_recoverable_send(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Capacity(_) | tungstenite::Error::WriteBufferFull(_)
    )
}

async fn close_sink(mut ws_tx: WsSink) {
    if tokio::time::timeout(CLOSE_TIMEOUT, ws_tx.close())
        .await
        .is_err()
    {
        log::debug!("[chat] close handshake timed out");
    }
}

/// Resolves once the owner asks for disposal or goes away.
async fn disposed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    Lost,
    Disposed,
}

struct ConnectionTask {
    state: Arc<ChatState>,
    channel: MessageChannel,
    endpoint: Url,
    reconnect_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionTask {
    async fn run(mut self, previous: Option<JoinHandle<()>>) {
        // The previous socket must be gone before this one is dialled.
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let mut machine = PhaseMachine::new(self.state.clone());
        if *self.shutdown.borrow() {
            machine.fire(PhaseSignal::Dispose);
            return;
        }
        machine.fire(PhaseSignal::Connect);

        let mut failures: u32 = 0;
        loop {
            log::info!("[chat] connecting to {}", redacted(&self.endpoint));
            let opened = tokio::select! {
                biased;
                _ = disposed(&mut self.shutdown) => None,
                result = open_socket(&self.endpoint) => Some(result),
            };

            let exit = match opened {
                None => PumpExit::Disposed,
                Some(Err(e)) => {
                    failures += 1;
                    self.state.record(Diagnostic::Transport {
                        detail: format!("connection attempt {} failed: {}", failures, e),
                    });
                    PumpExit::Lost
                }
                Some(Ok(ws)) => {
                    failures = 0;
                    self.pump(ws, &mut machine).await
                }
            };
            if exit == PumpExit::Disposed {
                break;
            }

            machine.fire(PhaseSignal::Lost);
            log::info!(
                "[chat] websocket disconnected, reconnecting in {}ms",
                self.reconnect_delay.as_millis()
            );
            let mut timer = ReconnectTimer::schedule(self.reconnect_delay);
            let fired = tokio::select! {
                biased;
                _ = disposed(&mut self.shutdown) => false,
                fired = timer.fired() => fired,
            };
            if !fired {
                timer.cancel();
                break;
            }
            log::info!("[chat] attempting to reconnect");
            machine.fire(PhaseSignal::TimerFired);
        }

        machine.fire(PhaseSignal::Dispose);
        log::info!("[chat] connection closed");
    }

    /// Serve one open socket until it closes or disposal is requested.
    async fn pump(&mut self, ws: WsStream, machine: &mut PhaseMachine) -> PumpExit {
        let (mut ws_tx, mut ws_rx) = ws.split();
        // Disposal may have landed while the handshake was finishing.
        if *self.shutdown.borrow() {
            close_sink(ws_tx).await;
            return PumpExit::Disposed;
        }
        machine.fire(PhaseSignal::Opened);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutgoingFrame>();
        self.state.install_outbound(out_tx);
        self.state.set_connected(true);
        log::info!("[chat] websocket connected");

        let mut outbound_open = true;
        let exit = loop {
            tokio::select! {
                biased;
                _ = disposed(&mut self.shutdown) => break PumpExit::Disposed,
                frame = out_rx.recv(), if outbound_open => {
                    let Some(frame) = frame else {
                        outbound_open = false;
                        continue;
                    };
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!("[chat] failed to encode {}: {}", frame.kind(), e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(tungstenite::Message::Text(text.into())).await {
                        self.state.record(Diagnostic::Transport {
                            detail: format!("send failed: {}", e),
                        });
                        if !is_recoverable_send(&e) {
                            break PumpExit::Lost;
                        }
                    }
                }
                msg = ws_rx.next() => match msg {
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        match frame {
                            Some(frame) => log::info!(
                                "[chat] websocket closed: {} {}",
                                frame.code,
                                frame.reason
                            ),
                            None => log::info!("[chat] websocket closed"),
                        }
                        break PumpExit::Lost;
                    }
                    Some(Ok(msg)) => {
                        // Decode failures are already recorded as diagnostics.
                        let _ = self.channel.receive(&msg);
                    }
                    // The stream is fused after any read error, including a
                    // malformed frame, so the socket is gone either way.
                    Some(Err(e)) => {
                        self.state.record(Diagnostic::Transport {
                            detail: format!("websocket error: {}", e),
                        });
                        break PumpExit::Lost;
                    }
                    None => {
                        log::info!("[chat] websocket stream ended");
                        break PumpExit::Lost;
                    }
                },
            }
        };

        self.state.set_connected(false);
        self.state.clear_outbound();
        close_sink(ws_tx).await;
        exit
    }
}

struct LiveConnection {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the connection task. At most one task, and therefore one socket,
/// is alive per manager.
pub struct ConnectionManager {
    state: Arc<ChatState>,
    settings: Arc<ClientSettings>,
    credentials: Option<Credentials>,
    live: Option<LiveConnection>,
    /// A disposed task that may still be closing its socket.
    retiring: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(state: Arc<ChatState>, settings: Arc<ClientSettings>) -> Self {
        Self {
            state,
            settings,
            credentials: None,
            live: None,
            retiring: None,
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.live.as_ref().is_some_and(|live| !live.task.is_finished())
    }

    /// Open (or reopen) the socket for `identity`. Empty identity or
    /// credential is a no-op. Any existing connection is disposed first.
    pub fn connect(&mut self, identity: &str, credential: &str) {
        let Some(credentials) = Credentials::new(identity, credential) else {
            log::warn!("[chat] connect skipped: identity or credential is empty");
            return;
        };
        let endpoint = match self.settings.chat_socket_url(identity, credential) {
            Ok(url) => url,
            Err(e) => {
                log::error!("[chat] cannot build socket url: {}", e);
                return;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::error!("[chat] connect called outside a tokio runtime");
            return;
        };

        if self
            .credentials
            .as_ref()
            .is_some_and(|previous| previous != &credentials)
        {
            log::info!("[chat] identity changed, forgetting session");
            self.state.forget_session();
        }

        let previous = self.retire().or_else(|| self.retiring.take());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = ConnectionTask {
            state: self.state.clone(),
            channel: MessageChannel::new(self.state.clone()),
            endpoint,
            reconnect_delay: self.settings.reconnect_delay(),
            shutdown: shutdown_rx,
        };
        let handle = runtime.spawn(task.run(previous));
        self.live = Some(LiveConnection {
            shutdown: shutdown_tx,
            task: handle,
        });
        self.credentials = Some(credentials);
    }

    /// Cancel any pending reconnect and close the live socket. The task
    /// finishes in the background.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.retire() {
            self.retiring = Some(task);
        }
    }

    /// Dispose and hand back the task so the caller can await its exit.
    pub fn shutdown(&mut self) -> impl Future<Output = ()> + Send + 'static {
        self.disconnect();
        let task = self.retiring.take();
        async move {
            if let Some(task) = task {
                let _ = task.await;
            }
        }
    }

    fn retire(&mut self) -> Option<JoinHandle<()>> {
        let live = self.live.take()?;
        let _ = live.shutdown.send(true);
        self.state.set_connected(false);
        self.state.clear_outbound();
        Some(live.task)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_table_follows_lifecycle() {
        use ConnectionPhase::*;
        use PhaseSignal::*;
        assert_eq!(Disconnected.next(Connect), Some(Connecting));
        assert_eq!(Connecting.next(Opened), Some(Connected));
        assert_eq!(Connected.next(Lost), Some(Reconnecting));
        assert_eq!(Connecting.next(Lost), Some(Reconnecting));
        assert_eq!(Reconnecting.next(TimerFired), Some(Connecting));
        for phase in [Disconnected, Connecting, Connected, Reconnecting] {
            assert_eq!(phase.next(Dispose), Some(Closed));
        }
    }

    #[test]
    fn closed_rejects_everything() {
        use PhaseSignal::*;
        for signal in [Connect, Opened, Lost, TimerFired, Dispose] {
            assert_eq!(ConnectionPhase::Closed.next(signal), None);
        }
    }

    #[test]
    fn out_of_order_signals_are_rejected() {
        use ConnectionPhase::*;
        use PhaseSignal::*;
        assert_eq!(Disconnected.next(Opened), None);
        assert_eq!(Connected.next(TimerFired), None);
        assert_eq!(Reconnecting.next(Lost), None);
        assert_eq!(Connected.next(Connect), None);
    }

    #[test]
    fn machine_mirrors_phase_into_state() {
        let state = Arc::new(ChatState::default());
        let mut machine = PhaseMachine::new(state.clone());
        assert!(machine.fire(PhaseSignal::Connect));
        assert_eq!(state.phase(), ConnectionPhase::Connecting);
        assert!(!machine.fire(PhaseSignal::TimerFired));
        assert_eq!(state.phase(), ConnectionPhase::Connecting);
        assert!(machine.fire(PhaseSignal::Dispose));
        assert!(!machine.fire(PhaseSignal::Lost));
        assert_eq!(state.phase(), ConnectionPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_timer_fires_after_delay() {
        let start = tokio::time::Instant::now();
        let mut timer = ReconnectTimer::schedule(Duration::from_millis(3000));
        assert!(timer.is_pending());

        let early = tokio::time::timeout(Duration::from_millis(2999), timer.fired()).await;
        assert!(early.is_err());
        assert!(timer.is_pending());

        assert!(timer.fired().await);
        assert!(start.elapsed() >= Duration::from_millis(3000));
        assert!(!timer.is_pending());
        // Fires once.
        assert!(!timer.fired().await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let start = tokio::time::Instant::now();
        let mut timer = ReconnectTimer::schedule(Duration::from_millis(3000));
        timer.cancel();
        assert!(!timer.is_pending());
        assert!(!timer.fired().await);
        assert!(start.elapsed() < Duration::from_millis(3000));
    }

    #[test]
    fn credentials_require_both_parts_and_hide_secret() {
        assert!(Credentials::new("", "tok").is_none());
        assert!(Credentials::new("u1", "").is_none());
        let creds = Credentials::new("u1", "secret-token").unwrap();
        let printed = format!("{creds:?}");
        assert!(printed.contains("u1"));
        assert!(!printed.contains("secret-token"));
    }

    #[test]
    fn logged_url_hides_token() {
        let url = Url::parse("ws://localhost:8000/api/v1/chat/ws/chat/u1?token=secret").unwrap();
        let shown = redacted(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.starts_with("ws://localhost:8000/api/v1/chat/ws/chat/u1"));
    }

    #[test]
    fn ws_request_carries_user_agent() {
        let url = Url::parse("ws://localhost:8000/api/v1/chat/ws/chat/u1?token=t").unwrap();
        let request = build_ws_request(&url).unwrap();
        assert_eq!(
            request.headers().get(USER_AGENT).unwrap(),
            CLIENT_USER_AGENT
        );
        assert_eq!(request.uri().path(), "/api/v1/chat/ws/chat/u1");
    }

    #[tokio::test]
    async fn disposal_before_pump_publishes_nothing() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });
        let endpoint = Url::parse(&format!("ws://{addr}/chat")).unwrap();
        let ws = open_socket(&endpoint).await.unwrap();

        let state = Arc::new(ChatState::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut task = ConnectionTask {
            state: state.clone(),
            channel: MessageChannel::new(state.clone()),
            endpoint,
            reconnect_delay: Duration::from_millis(10),
            shutdown: shutdown_rx,
        };
        let mut machine = PhaseMachine::new(state.clone());
        machine.fire(PhaseSignal::Connect);
        let mut updates = state.subscribe();
        shutdown_tx.send(true).unwrap();

        assert_eq!(task.pump(ws, &mut machine).await, PumpExit::Disposed);
        assert!(!state.is_connected());
        assert_eq!(state.phase(), ConnectionPhase::Connecting);
        assert!(updates.try_recv().is_err());
        let frame = OutgoingFrame::TextMessage {
            content: "late".into(),
            session_id: None,
        };
        assert!(state.transmit(frame).is_err());
        // The socket was closed, so the server side finishes.
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn connect_without_runtime_or_identity_is_noop() {
        let state = Arc::new(ChatState::default());
        let mut manager =
            ConnectionManager::new(state.clone(), Arc::new(ClientSettings::default()));
        manager.connect("", "tok");
        manager.connect("u1", "tok");
        assert!(!manager.is_running());
        assert!(manager.credentials().is_none());
        assert_eq!(state.phase(), ConnectionPhase::Disconnected);
    }
}
