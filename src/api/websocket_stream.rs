//! Video retrieval endpoint

use crate::api::rest::AppState;
use crate::api::websocket::{finish_writer, reject, spawn_writer, SocketReader, WsAuthParams};
use crate::realtime::ConnectionKind;
use crate::video::VideoSessionManager;
use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures::StreamExt;
use log::info;
use tokio::sync::mpsc;

pub async fn video_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<WsAuthParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_video_socket(socket, params.token, state))
}

async fn handle_video_socket(socket: WebSocket, token: Option<String>, state: AppState) {
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

    // Registered for bookkeeping only; broadcasts skip video connections
    let connection = state
        .registry
        .add(ConnectionKind::Video, identity.clone(), tx.clone())
        .await;
    info!(
        "Video connection {} opened for {}",
        connection.id, identity.username
    );

    let mut manager = VideoSessionManager::new(state.video.clone(), identity, tx.clone());
    let mut reader = SocketReader::new(stream, tx, state.streaming.heartbeat_interval_secs);

    while let Some(text) = reader.next_text().await {
        manager.handle_text(&text).await;
    }

    // Cancels the in-flight fetch and kills the transcoder
    manager.close().await;
    state.registry.remove(&connection.id).await;
    info!("Video connection {} closed", connection.id);

    drop(manager);
    drop(reader);
    drop(connection);
    finish_writer(writer).await;
}
