//! HTTP and WebSocket surface of the gateway
//!
//! Each websocket is one connection of the orchestrator. Text frames are
//! decoded and queued on the worker; outbound frames come back through an
//! unbounded channel drained by a per-socket forwarder task.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use callwire_signal_core::{ConnectionId, OrchestratorHandle, SignalError};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AppState {
    pub handle: OrchestratorHandle,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Registry snapshot, for operators
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    match state.handle.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection = ConnectionId::generate();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    if let Err(e) = state.handle.connect(connection.clone(), tx) {
        warn!("Refusing websocket {}: {}", connection, e);
        return;
    }
    info!("Websocket {} opened", connection);

    let forwarder = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = frame.encode();
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                debug!("Failed to send frame: {}", e);
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match state.handle.inbound_text(&connection, text.as_str()) {
                Ok(()) => {}
                Err(SignalError::WorkerClosed) => break,
                Err(e) => debug!("Dropping frame on {}: {}", connection, e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Dropping the registry's sink ends the forwarder
    if let Err(e) = state.handle.disconnect(connection.clone()) {
        debug!("Disconnect of {} not delivered: {}", connection, e);
        forwarder.abort();
    }
    info!("Websocket {} closed", connection);
}
