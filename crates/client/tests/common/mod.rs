//! In-process token endpoint and notification channel for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use livesync_client::{ConnectionStatus, ReconnectConfig, SyncConfig, SyncHandle};
use livesync_shared::ProblemDetails;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

pub const WAIT: Duration = Duration::from_secs(5);

/// A frame the server read from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(Value),
    Close(Option<u16>),
}

/// Server side of one accepted socket.
pub struct ServerConn {
    pub token: String,
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: mpsc::UnboundedReceiver<Frame>,
}

impl ServerConn {
    pub fn push(&self, message: Value) {
        self.outgoing
            .send(Message::Text(message.to_string().into()))
            .expect("socket writer gone");
    }

    pub fn close(&self, code: u16) {
        self.outgoing
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: Utf8Bytes::from_static("server close"),
            })))
            .expect("socket writer gone");
    }

    pub async fn recv(&mut self) -> Frame {
        timeout(WAIT, self.incoming.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("socket ended")
    }
}

#[derive(Default)]
pub struct ServerState {
    pub token_fetches: AtomicUsize,
    pub reject_tokens: AtomicBool,
    pub cookies: Mutex<Vec<Option<String>>>,
    connections: Mutex<Option<mpsc::UnboundedSender<ServerConn>>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    connections: mpsc::UnboundedReceiver<ServerConn>,
}

impl TestServer {
    pub async fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(ServerState::default());
        *state.connections.lock().unwrap() = Some(tx);

        let app = Router::new()
            .route("/api/ws/token", get(issue_token))
            .route("/ws/notifications", get(channel))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            connections: rx,
        }
    }

    /// Client configuration pointed at this server with a fast fixed reconnect.
    pub fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(Url::parse(&format!("http://{}", self.addr)).unwrap());
        config.session_cookie = Some("sid=test-session".into());
        config.reconnect = ReconnectConfig::fixed(Duration::from_millis(50));
        config
    }

    pub async fn accept(&mut self) -> ServerConn {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }

    pub async fn assert_no_connection(&mut self, within: Duration) {
        if let Ok(Some(conn)) = timeout(within, self.connections.recv()).await {
            panic!("unexpected connection with token {}", conn.token);
        }
    }

    pub fn token_fetches(&self) -> usize {
        self.state.token_fetches.load(Ordering::SeqCst)
    }

    pub fn reject_tokens(&self, reject: bool) {
        self.state.reject_tokens.store(reject, Ordering::SeqCst);
    }
}

async fn issue_token(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let n = state.token_fetches.fetch_add(1, Ordering::SeqCst) + 1;
    let cookie = headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.cookies.lock().unwrap().push(cookie);

    if state.reject_tokens.load(Ordering::SeqCst) {
        let problem = ProblemDetails::unauthorized("session expired");
        return (StatusCode::UNAUTHORIZED, Json(problem)).into_response();
    }
    Json(json!({ "token": format!("token-{n}") })).into_response()
}

async fn channel(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let token = params.get("token").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| serve_socket(socket, token, state))
}

async fn serve_socket(socket: WebSocket, token: String, state: Arc<ServerState>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

    let accepted = state
        .connections
        .lock()
        .unwrap()
        .as_ref()
        .map(|tx| {
            tx.send(ServerConn {
                token,
                outgoing: out_tx,
                incoming: in_rx,
            })
            .is_ok()
        })
        .unwrap_or(false);
    if !accepted {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                let _ = in_tx.send(Frame::Text(value));
            }
            Message::Close(frame) => {
                let _ = in_tx.send(Frame::Close(frame.map(|f| f.code)));
                break;
            }
            _ => {}
        }
    }
    writer.abort();
}

pub async fn wait_for_status(
    handle: &SyncHandle,
    predicate: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut status = handle.watch_status();
    let matched = timeout(WAIT, status.wait_for(predicate))
        .await
        .expect("timed out waiting for connection status")
        .expect("connection task gone")
        .clone();
    matched
}
