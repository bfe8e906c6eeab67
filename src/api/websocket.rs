//! Path event endpoint plus the socket plumbing shared with the video
//! endpoint: handshake rejection, the outbound writer task and the
//! heartbeat-aware reader.

use crate::api::rest::AppState;
use crate::realtime::{ConnectionKind, Outbound, ServerMessage};
use crate::security::HandshakeError;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Close code sent when a client stops answering pings
const CLOSE_GOING_AWAY: u16 = 1001;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters accepted on the WebSocket handshake
#[derive(Debug, Deserialize)]
pub struct WsAuthParams {
    pub token: Option<String>,
}

pub async fn events_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<WsAuthParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(socket, params.token, state))
}

async fn handle_events_socket(socket: WebSocket, token: Option<String>, state: AppState) {
    let identity = match state.auth.authenticate(token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            reject(socket, e).await;
            return;
        }
    };

    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.streaming.outbound_buffer.max(1));
    let writer = spawn_writer(sink, rx);

    info!("Event connection opened for {}", identity.username);
    let connection = state
        .registry
        .add(ConnectionKind::Events, identity, tx.clone())
        .await;

    connection
        .send_json(&ServerMessage::Connected {
            user_id: connection.user_id,
        })
        .await;

    let mut reader = SocketReader::new(stream, tx, state.streaming.heartbeat_interval_secs);
    while let Some(text) = reader.next_text().await {
        state.subscriptions.handle_text(&connection, &text).await;
    }

    state.registry.remove(&connection.id).await;
    info!("Event connection {} closed", connection.id);

    drop(reader);
    drop(connection);
    finish_writer(writer).await;
}

/// Send the handshake failure as a close frame
pub(crate) async fn reject(mut socket: WebSocket, err: HandshakeError) {
    match &err {
        HandshakeError::Internal(_) => warn!("Handshake failed: {}", err),
        _ => debug!("Handshake rejected: {}", err),
    }

    let frame = CloseFrame {
        code: err.close_code(),
        reason: err.reason().into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!("Failed to send close frame: {}", e);
    }
}

fn into_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text),
        Outbound::Binary(bytes) => Message::Binary(bytes.to_vec()),
        Outbound::Ping => Message::Ping(Vec::new()),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

/// Owns the socket's write half; stops after a close frame, a write error,
/// or once every sender is gone.
pub(crate) fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, Outbound::Close { .. });
            if let Err(e) = sink.send(into_message(frame)).await {
                debug!("Socket write failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    })
}

/// Wait for queued frames to drain, then give up on the writer
pub(crate) async fn finish_writer(writer: JoinHandle<()>) {
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
}

/// Read half of a socket with the server-side heartbeat
pub(crate) struct SocketReader {
    stream: SplitStream<WebSocket>,
    outbound: mpsc::Sender<Outbound>,
    heartbeat: Option<Interval>,
    awaiting_pong: bool,
}

impl SocketReader {
    /// `heartbeat_secs == 0` disables pings
    pub fn new(
        stream: SplitStream<WebSocket>,
        outbound: mpsc::Sender<Outbound>,
        heartbeat_secs: u64,
    ) -> Self {
        let heartbeat = (heartbeat_secs > 0).then(|| {
            let period = Duration::from_secs(heartbeat_secs);
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        Self {
            stream,
            outbound,
            heartbeat,
            awaiting_pong: false,
        }
    }

    /// Next text frame, `None` once the connection is over
    pub async fn next_text(&mut self) -> Option<String> {
        let Self {
            stream,
            outbound,
            heartbeat,
            awaiting_pong,
        } = self;

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => return Some(text),
                    Some(Ok(Message::Pong(_))) => *awaiting_pong = false,
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Binary(_))) => debug!("Ignoring binary frame from client"),
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Err(e)) => {
                        debug!("Socket read failed: {}", e);
                        return None;
                    }
                },
                _ = tick(heartbeat) => {
                    if *awaiting_pong {
                        debug!("Client missed a heartbeat, closing");
                        let _ = outbound.try_send(Outbound::Close {
                            code: CLOSE_GOING_AWAY,
                            reason: "Heartbeat timeout".to_string(),
                        });
                        return None;
                    }
                    match outbound.try_send(Outbound::Ping) {
                        Ok(()) => *awaiting_pong = true,
                        // A saturated queue is still a live writer
                        Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Closed(_)) => return None,
                    }
                }
            }
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}
