//! WebSocket handler for real-time messaging

use axum::{
    extract::{ws::{Message, WebSocket}, ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::SplitSink, Stream, StreamExt};
use parlor_shared::Frame;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::db::ChatStore;
use crate::dispatcher::{self, CommandTable};
use crate::handshake;
use crate::heartbeat::LivenessTimer;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionHandle, Outbound, Session};

/// How long a closing connection gets to flush queued frames
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

/// Server state shared across connections
pub struct ServerState {
    pub store: Arc<dyn ChatStore>,
    pub config: ServerConfig,
    /// Live session per user
    pub registry: SessionRegistry,
    /// Configured command tokens
    pub commands: CommandTable,
    /// Current total connection count (for enforcing max_connections)
    connection_count: AtomicUsize,
    /// Per-IP connection counts (for enforcing max_connections_per_ip)
    ip_connections: dashmap::DashMap<IpAddr, AtomicUsize>,
}

impl ServerState {
    pub fn new(store: Arc<dyn ChatStore>, config: ServerConfig) -> Self {
        let commands = CommandTable::new(&config.commands);
        Self {
            store,
            config,
            registry: SessionRegistry::new(),
            commands,
            connection_count: AtomicUsize::new(0),
            ip_connections: dashmap::DashMap::new(),
        }
    }

    /// Try to acquire a connection slot. Returns false if limits are exceeded.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> bool {
        let max_global = self.config.max_connections;
        let max_per_ip = self.config.max_connections_per_ip;

        // 0 = unlimited
        if max_global > 0 && self.connection_count.load(Ordering::Relaxed) >= max_global {
            return false;
        }

        if max_per_ip > 0 {
            let entry = self.ip_connections.entry(ip).or_insert_with(|| AtomicUsize::new(0));
            if entry.value().load(Ordering::Relaxed) >= max_per_ip {
                return false;
            }
            entry.value().fetch_add(1, Ordering::Relaxed);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Release a connection slot.
    pub fn release_connection(&self, ip: IpAddr) {
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
        if let Some(entry) = self.ip_connections.get(&ip) {
            let prev = entry.value().fetch_sub(1, Ordering::Relaxed);
            if prev <= 1 {
                drop(entry);
                self.ip_connections.remove(&ip);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// WebSocket upgrade handler
// ---------------------------------------------------------------------------

/// Handle WebSocket upgrade; enforces connection limits before accepting
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let ip = addr.ip();

    if !state.try_acquire_connection(ip) {
        warn!("Connection rejected for {}: limit exceeded", ip);
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let buffer = state.config.ws_buffer_size;
    ws.write_buffer_size(buffer)
        .max_message_size(buffer)
        .max_frame_size(buffer)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
        .into_response()
}

// ---------------------------------------------------------------------------
// Socket lifecycle
// ---------------------------------------------------------------------------

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, addr: SocketAddr) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Outbound>(state.config.outbound_queue);
    let handle = ConnectionHandle::new(tx);

    debug!("New WebSocket connection from {}", addr);

    let mut writer = tokio::spawn(write_loop(
        ws_sender,
        rx,
        handle.cancel.clone(),
        state.config.ws_ping_interval,
    ));

    match handshake::authenticate(&mut ws_receiver, &handle, &state).await {
        Ok(session) => {
            let reason = run_session(&state, &session, &mut ws_receiver).await;
            teardown(&state, &session);
            info!("User {} disconnected ({}): {:?}", session.user_id(), addr, reason);
        }
        Err(e) => {
            info!("Login from {} failed: {}", addr, e);
            handle.cancel.cancel();
        }
    }
    drop(handle);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    state.release_connection(addr.ip());
}

/// Why a session's read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed locally: logout, eviction by a newer login, or a dead writer
    Closed,
    /// No inbound frame within the heartbeat timeout
    HeartbeatTimeout,
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Transport read failed
    ReadError,
}

/// Read loop of an admitted session.
///
/// Every inbound frame, whatever its kind, pushes the liveness deadline back.
/// Frames are dispatched one at a time, in arrival order.
pub async fn run_session<S>(state: &ServerState, session: &Arc<Session>, frames: &mut S) -> DisconnectReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut liveness = LivenessTimer::new(state.config.heartbeat_timeout());

    loop {
        let next = tokio::select! {
            biased;
            _ = session.closed() => return DisconnectReason::Closed,
            _ = liveness.expired() => {
                warn!(
                    "User {} missed heartbeat for {:?}, closing",
                    session.user_id(),
                    state.config.heartbeat_timeout()
                );
                return DisconnectReason::HeartbeatTimeout;
            }
            next = frames.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                liveness.reset();
                match msg {
                    Message::Text(text) => dispatcher::dispatch(state, session, &Frame::Text(text)).await,
                    Message::Binary(data) => dispatcher::dispatch(state, session, &Frame::Binary(data)).await,
                    Message::Close(_) => return DisconnectReason::PeerClosed,
                    Message::Ping(_) | Message::Pong(_) => { /* axum auto-responds to pings */ }
                }
            }
            Some(Err(e)) => {
                debug!("WebSocket error for user {}: {}", session.user_id(), e);
                return DisconnectReason::ReadError;
            }
            None => return DisconnectReason::PeerClosed,
        }
    }
}

/// Single cleanup path for every way a session can end.
///
/// Closes the transport and drops the registry entry if it still belongs to
/// this connection. Returns whether the entry was removed.
pub fn teardown(state: &ServerState, session: &Session) -> bool {
    session.close();
    let removed = state.registry.remove_if_current(session);
    if !removed {
        debug!(
            "Connection {} of user {} was already replaced",
            session.connection_id(),
            session.user_id()
        );
    }
    removed
}

/// Forward queued frames to the socket and send periodic pings.
///
/// On cancellation, whatever is already queued is flushed before the close
/// frame. A failed write cancels the connection so the read loop exits too;
/// frames still queued at that point are dropped unconfirmed.
async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    ping_interval_secs: u64,
) {
    let pinging = ping_interval_secs > 0;
    let mut ping_ticker = tokio::time::interval(Duration::from_secs(ping_interval_secs.max(1)));
    ping_ticker.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => {
                match frame {
                    Some(outbound) => {
                        if !forward(&mut ws_sender, outbound).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = cancel.cancelled() => {
                while let Ok(outbound) = rx.try_recv() {
                    if !forward(&mut ws_sender, outbound).await {
                        break;
                    }
                }
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
            _ = ping_ticker.tick(), if pinging => {
                if ws_sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        }
    }

    cancel.cancel();
}

/// Write one queued frame, confirming it to a waiting sender on success.
async fn forward(ws_sender: &mut SplitSink<WebSocket, Message>, outbound: Outbound) -> bool {
    let Outbound { frame, written } = outbound;
    if ws_sender.send(into_message(frame)).await.is_err() {
        return false;
    }
    Outbound::confirm(written);
    true
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
    }
}
