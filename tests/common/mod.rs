#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

/// Local websocket endpoint standing in for the chat backend.
pub struct MockChatServer {
    addr: SocketAddr,
    incoming: mpsc::UnboundedReceiver<MockConnection>,
    accept: JoinHandle<()>,
}

impl MockChatServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, incoming) = mpsc::unbounded_channel();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(conn) = MockConnection::handshake(stream).await {
                        let _ = tx.send(conn);
                    }
                });
            }
        });
        Self {
            addr,
            incoming,
            accept,
        }
    }

    pub fn server_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    pub async fn next_connection(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.incoming.recv())
            .await
            .expect("no connection within timeout")
            .expect("accept loop ended")
    }

    pub async fn assert_no_connection(&mut self, within: Duration) {
        if let Ok(Some(conn)) = tokio::time::timeout(within, self.incoming.recv()).await {
            panic!("unexpected connection to {}", conn.target);
        }
    }
}

impl Drop for MockChatServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

pub struct MockConnection {
    /// Path and query the client dialled.
    pub target: String,
    pub user_agent: Option<String>,
    ws: WebSocketStream<TcpStream>,
}

impl MockConnection {
    async fn handshake(stream: TcpStream) -> Option<Self> {
        let mut target = String::new();
        let mut user_agent = None;
        let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            target = req.uri().to_string();
            user_agent = req
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        };
        let ws = accept_hdr_async(stream, capture).await.ok()?;
        Some(Self {
            target,
            user_agent,
            ws,
        })
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Write bytes straight to the TCP stream, bypassing frame validation.
    pub async fn send_wire_bytes(&mut self, bytes: &[u8]) {
        let stream = self.ws.get_mut();
        stream.write_all(bytes).await.unwrap();
        stream.flush().await.unwrap();
    }

    /// Next text frame from the client, parsed.
    pub async fn next_json(&mut self) -> Value {
        let read = async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return serde_json::from_str::<Value>(&text).unwrap()
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("socket ended while waiting for a frame: {other:?}"),
                }
            }
        };
        tokio::time::timeout(WAIT, read)
            .await
            .expect("no frame within timeout")
    }

    /// Server-initiated close.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
        let _ = tokio::time::timeout(WAIT, async {
            while let Some(Ok(_)) = self.ws.next().await {}
        })
        .await;
    }

    /// True once the client has closed this socket.
    pub async fn wait_closed(&mut self) -> bool {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .is_ok()
    }
}

/// Poll `check` until it holds, panicking after [`WAIT`].
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
