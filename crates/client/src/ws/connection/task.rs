//! The tokio task that owns the notification socket.
//!
//! One task per [`SyncClient`]. It owns the socket, the heartbeat interval,
//! the reconnect timer and the [`ConnectionMachine`]; everything else talks
//! to it over channels. Inbound frames are decoded and routed inline, so they
//! reach the cache in arrival order.

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::{SinkExt, StreamExt};
use livesync_shared::{OutboundCommand, CLOSE_ABNORMAL};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{ConnectionStatus, SyncHandle};
use crate::config::SyncConfig;
use crate::credentials::TokenProvider;
use crate::notify::{NotificationPresenter, NotificationSink};
use crate::stores::QueryCache;
use crate::ws::codec;
use crate::ws::machine::{ConnectionMachine, Effect, Input, Visibility};
use crate::ws::router::Router;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, ConnectFailure>> + Send>>;

/// Close code tungstenite reports for a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// How long a close handshake may take before the socket is just dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Control {
    Connect,
    Disconnect,
    Visibility(Visibility),
    Shutdown,
}

#[derive(Debug)]
enum ConnectFailure {
    Credential(String),
    Transport(String),
}

/// Owner of a notification channel.
///
/// Dropping it disconnects (close code 1000) and stops the connection task.
/// Clone [`SyncHandle`]s out of it for code that only needs `send` or the
/// connection state.
pub struct SyncClient {
    handle: SyncHandle,
    control: mpsc::UnboundedSender<Control>,
    task: Option<JoinHandle<()>>,
}

impl SyncClient {
    /// Spawn the connection task on the current tokio runtime. The channel
    /// stays idle until [`SyncClient::connect`] is called.
    pub fn spawn(
        config: SyncConfig,
        credentials: Arc<dyn TokenProvider>,
        cache: Arc<QueryCache>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = unbounded();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let task = ConnectionTask {
            machine: ConnectionMachine::new(config.reconnect.clone()),
            config,
            credentials,
            router: Router::new(cache, NotificationPresenter::new(notifier)),
            control: control_rx,
            outbound: outbound_rx,
            status: status_tx,
            socket: None,
            connecting: None,
            heartbeat: None,
            reconnect: ReconnectTimer::default(),
        };

        Self {
            handle: SyncHandle::new(outbound_tx, status_rx),
            control: control_tx,
            task: Some(tokio::spawn(task.run())),
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.handle.status()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Connect if idle. A no-op while connecting or open.
    pub fn connect(&self) {
        self.control(Control::Connect);
    }

    /// Close with the intentional close code and stop reconnecting.
    pub fn disconnect(&self) {
        self.control(Control::Disconnect);
    }

    /// Report foreground/background transitions of the host.
    pub fn set_visibility(&self, visibility: Visibility) {
        self.control(Control::Visibility(visibility));
    }

    /// Disconnect and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        self.control(Control::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "connection task failed");
            }
        }
    }

    fn control(&self, control: Control) {
        if self.control.send(control).is_err() {
            tracing::warn!("connection task is not running");
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.control.send(Control::Shutdown);
        }
    }
}

/// The single reconnect timer. Scheduling replaces whatever was pending.
#[derive(Default)]
struct ReconnectTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    fn schedule(&mut self, delay: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn cancel(&mut self) {
        self.sleep = None;
    }

    async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending().await,
        }
    }
}

struct ConnectionTask {
    config: SyncConfig,
    credentials: Arc<dyn TokenProvider>,
    router: Router,
    machine: ConnectionMachine,
    control: mpsc::UnboundedReceiver<Control>,
    outbound: UnboundedReceiver<OutboundCommand>,
    status: watch::Sender<ConnectionStatus>,
    socket: Option<WsStream>,
    connecting: Option<ConnectFuture>,
    heartbeat: Option<Interval>,
    reconnect: ReconnectTimer,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            let writable = self.socket.is_some();
            tokio::select! {
                control = self.control.recv() => match control {
                    Some(Control::Connect) => self.apply(Input::Connect).await,
                    Some(Control::Disconnect) => self.apply(Input::Disconnect).await,
                    Some(Control::Visibility(visibility)) => {
                        self.apply(Input::VisibilityChanged(visibility)).await
                    }
                    Some(Control::Shutdown) | None => {
                        self.apply(Input::Disconnect).await;
                        break;
                    }
                },
                result = connect_result(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(socket) => {
                            self.socket = Some(socket);
                            self.apply(Input::Opened).await;
                            tracing::info!("notification channel open");
                        }
                        Err(ConnectFailure::Credential(reason)) => {
                            tracing::warn!(%reason, "could not obtain channel token");
                            self.apply(Input::CredentialFailed(reason)).await;
                        }
                        Err(ConnectFailure::Transport(reason)) => {
                            tracing::warn!(%reason, "could not open notification channel");
                            self.apply(Input::OpenFailed(reason)).await;
                        }
                    }
                }
                frame = next_frame(&mut self.socket) => self.on_frame(frame).await,
                _ = tick(&mut self.heartbeat) => self.apply(Input::HeartbeatTick).await,
                _ = self.reconnect.expired() => self.apply(Input::ReconnectDue).await,
                Some(cmd) = self.outbound.next(), if writable => {
                    if let Err(reason) = self.write(&cmd).await {
                        self.apply(Input::SocketError(reason)).await;
                    }
                }
            }
        }
        self.router.cancel_refetches();
        tracing::debug!("connection task stopped");
    }

    async fn apply(&mut self, input: Input) {
        for effect in self.machine.handle(input) {
            match effect {
                Effect::BeginConnect => {
                    tracing::debug!("connecting to notification channel");
                    self.connecting = Some(Box::pin(open_channel(
                        self.config.clone(),
                        Arc::clone(&self.credentials),
                    )));
                }
                Effect::AbortConnect => self.connecting = None,
                Effect::StartHeartbeat => {
                    let period = self.config.heartbeat_interval;
                    if !period.is_zero() {
                        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        self.heartbeat = Some(interval);
                    }
                }
                Effect::StopHeartbeat => self.heartbeat = None,
                Effect::ScheduleReconnect(delay) => {
                    let delay = self.config.reconnect.jittered(delay);
                    tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                    self.reconnect.schedule(delay);
                }
                Effect::CancelReconnect => self.reconnect.cancel(),
                Effect::SendPing => {
                    // A failed ping surfaces through the read side.
                    if let Err(reason) = self.write(&OutboundCommand::Ping).await {
                        tracing::debug!(%reason, "heartbeat ping failed");
                    }
                }
                Effect::CloseSocket { code } => self.close_socket(code).await,
                Effect::Publish(status) => {
                    tracing::debug!(phase = ?status.phase, last_error = ?status.last_error, "connection status");
                    self.status.send_replace(status);
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => match codec::decode(text.as_str()) {
                Ok(message) => self.router.route(message),
                Err(rejected) => rejected.log(),
            },
            Some(Ok(Message::Close(frame))) => {
                let code = frame
                    .map(|f| u16::from(f.code))
                    .unwrap_or(CLOSE_NO_STATUS);
                tracing::info!(code, "server closed notification channel");
                // Flush tungstenite's close reply before letting go.
                if let Some(mut socket) = self.socket.take() {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, socket.close(None)).await;
                }
                self.socket_closed(code).await;
            }
            Some(Ok(Message::Ping(_))) => {
                // Pong is handled automatically by tungstenite
                tracing::trace!("transport ping");
            }
            Some(Ok(_)) => {
                // Binary and pong frames carry nothing for us.
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "notification channel read error");
                self.apply(Input::SocketError(e.to_string())).await;
                self.socket_closed(CLOSE_ABNORMAL).await;
            }
            None => {
                tracing::info!("notification channel ended without close frame");
                self.socket_closed(CLOSE_ABNORMAL).await;
            }
        }
    }

    async fn socket_closed(&mut self, code: u16) {
        self.socket = None;
        self.discard_unsent();
        self.apply(Input::Closed { code }).await;
    }

    /// Commands accepted just before the socket went away are not replayed
    /// on the next connection.
    fn discard_unsent(&mut self) {
        while let Ok(Some(cmd)) = self.outbound.try_next() {
            tracing::debug!(?cmd, "dropping unsent command");
        }
    }

    async fn write(&mut self, cmd: &OutboundCommand) -> Result<(), String> {
        let Some(socket) = self.socket.as_mut() else {
            tracing::debug!(?cmd, "socket gone, dropping command");
            return Ok(());
        };
        let json = codec::encode(cmd).map_err(|e| format!("serialize failed: {}", e))?;
        tracing::trace!(%json, "sending");
        socket
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| format!("send failed: {}", e))
    }

    async fn close_socket(&mut self, code: u16) {
        self.discard_unsent();
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "client disconnect".into(),
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, socket.close(Some(frame))).await {
            Ok(Ok(())) => tracing::info!(code, "notification channel closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "close handshake failed"),
            Err(_) => tracing::debug!("close handshake timed out"),
        }
    }
}

/// Fetch a token and open the socket.
async fn open_channel(
    config: SyncConfig,
    credentials: Arc<dyn TokenProvider>,
) -> Result<WsStream, ConnectFailure> {
    let token = credentials
        .fetch_token()
        .await
        .map_err(|e| ConnectFailure::Credential(e.reason()))?;
    let url = config
        .channel_url(&token)
        .map_err(|e| ConnectFailure::Transport(e.to_string()))?;

    let (socket, _response) = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ConnectFailure::Transport("connection timed out".to_string()))?
        .map_err(|e| ConnectFailure::Transport(e.to_string()))?;
    Ok(socket)
}

async fn connect_result(connecting: &mut Option<ConnectFuture>) -> Result<WsStream, ConnectFailure> {
    match connecting.as_mut() {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match socket.as_mut() {
        Some(socket) => socket.next().await,
        None => pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
