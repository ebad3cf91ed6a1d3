// WebSocket endpoint for interactive clients

use crate::commands::{ClientMessage, CommandDispatcher, Handled};
use crate::error::HubError;
use crate::registry::{ConnectionRegistry, OutboundFrame};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use exhibit_bus::CommandPublisher;
use exhibit_core::{TelemetryCache, TelemetrySnapshot};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Voice requests a client may have waiting on the reasoning provider
const VOICE_QUEUE: usize = 4;

/// Shared state behind every route
pub struct HubState {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub telemetry: Arc<TelemetryCache>,
    pub publisher: Arc<dyn CommandPublisher>,
    pub outbound_capacity: usize,
}

pub fn create_router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    remote: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<HubState>>,
) -> Response {
    let remote = remote.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<HubState>, remote: Option<SocketAddr>) {
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(state.outbound_capacity);

    let connection_id = match state.registry.register(remote, tx) {
        Ok(id) => id,
        Err(e) => {
            warn!("Refusing client {:?}: {}", remote, e);
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: axum::extract::ws::close_code::AGAIN,
                    reason: "hub at capacity".into(),
                })))
                .await;
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    // Writer: drains this client's queue only
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(frame.to_string())).await {
                debug!("Client {} write failed: {}", connection_id, e);
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Voice worker: reasoning calls for this client, one at a time and in order.
    // The reader never waits on it, so a later safety stop is handled on receipt.
    let (voice_tx, mut voice_rx) = mpsc::channel::<ClientMessage>(VOICE_QUEUE);
    let voice_dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        while let Some(message) = voice_rx.recv().await {
            log_handled(voice_dispatcher.handle(message).await, connection_id);
        }
    });

    let dispatcher = state.dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    handle_message(&dispatcher, &text, connection_id, &voice_tx).await
                }
                Ok(Message::Binary(_)) => {
                    warn!("Received binary message from {}, ignoring", connection_id);
                }
                Ok(Message::Close(_)) => {
                    debug!("Client {} closed the connection", connection_id);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    debug!("WebSocket error from {}: {}", connection_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            debug!("Send task completed for {}", connection_id);
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("Receive task completed for {}", connection_id);
            send_task.abort();
        }
    }

    state.registry.unregister(&connection_id);
    info!("Client disconnected: {}", connection_id);
}

/// Handle one client frame; reasoning-bound voice requests go to `voice`
async fn handle_message(
    dispatcher: &CommandDispatcher,
    text: &str,
    connection_id: uuid::Uuid,
    voice: &mpsc::Sender<ClientMessage>,
) {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => return log_handled(Err(e), connection_id),
    };

    if message.needs_reasoning() {
        match voice.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Too many voice requests from {}, dropping one", connection_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Voice worker for {} has stopped", connection_id);
            }
        }
        return;
    }

    log_handled(dispatcher.handle(message).await, connection_id);
}

fn log_handled(handled: Result<Handled, HubError>, connection_id: uuid::Uuid) {
    match handled {
        Ok(Handled::Published { target, wire }) => {
            info!("{} -> {}: {}", connection_id, target, wire);
        }
        Ok(Handled::Action { target, action }) => {
            info!("{} -> {}: {}", connection_id, target, action);
        }
        Ok(Handled::Voice(outcome)) => {
            debug!(
                "Voice request from {} answered (safety_stop={}, fallback={})",
                connection_id, outcome.safety_stop, outcome.fallback
            );
        }
        Ok(Handled::Broadcast(kind)) => debug!("{} relayed {}", connection_id, kind),
        Err(HubError::Malformed(reason)) => {
            warn!("Dropping malformed message from {}: {}", connection_id, reason);
        }
        Err(e) => error!("Command from {} failed: {}", connection_id, e),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    bus_connected: bool,
    bus_epoch: u64,
    connections: usize,
    telemetry: TelemetrySnapshot,
}

async fn health_handler(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    let bus_connected = state.publisher.is_connected();
    Json(HealthResponse {
        status: if bus_connected { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        bus_connected,
        bus_epoch: state.publisher.epoch(),
        connections: state.registry.connection_count(),
        telemetry: state.telemetry.read(),
    })
}
