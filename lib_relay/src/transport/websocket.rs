//! # WebSocket Transport
//!
//! Exposes the relay over HTTP with Axum:
//!
//! - `GET /ws`: websocket upgrade. Every upgraded socket is a connection.
//! - `GET /health`: liveness probe, always `OK`.
//! - `GET /status`: JSON client count and document size, `503` once the
//!   coordinator has stopped.
//! - Anything else is served from the optional static directory.
//!
//! ## Session Workflow
//!
//! 1.  **Registration**: a fresh `ConnectionId` and a `ChannelHandle` are
//!     created and an open event is sent to the coordinator, which answers
//!     with the snapshot through the handle.
//! 2.  **Writer Task**: drains the handle's queue into the socket. A `Close`
//!     item sends a close frame and ends the task.
//! 3.  **Reader Loop**: text and binary frames become message events, a close
//!     frame or end of stream becomes a close event, a read error becomes an
//!     error event. If the writer ends first (peer gone or force-closed), the
//!     connection is reported closed.
//! 4.  **Teardown**: once the coordinator forgets the connection it drops the
//!     handle, the queue closes, and the writer releases the socket. A peer
//!     that stops reading fills its queue and is evicted the same way.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::core::{ChannelHandle, ConnectionId, CoordinatorHandle, Outbound, OutboundQueue, Payload};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
struct AppState {
    coordinator: CoordinatorHandle,
}

/// # Router
///
/// Builds the relay's Axum router on top of a running coordinator.
///
/// The router must be served with connect info
/// (`into_make_service_with_connect_info::<SocketAddr>()`), as [`serve`] does.
pub fn router(coordinator: CoordinatorHandle, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler));

    if let Some(dir) = static_dir {
        log::info!("Serving static files from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors).with_state(AppState { coordinator })
}

/// Serves `app` on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            log::info!("HTTP listener shutting down.");
        })
        .await
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match state.coordinator.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let (sink, stream) = socket.split();
    drive_connection(ConnectionId::next(), addr, stream, sink, state.coordinator).await;
}

/// Runs one connection until it closes, errors, or its writer ends.
async fn drive_connection<S, K>(
    id: ConnectionId,
    addr: SocketAddr,
    mut stream: S,
    sink: K,
    coordinator: CoordinatorHandle,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: fmt::Display + Send,
{
    let (handle, outbound) = ChannelHandle::new(id);

    if coordinator.open(id, Arc::new(handle)).is_err() {
        log::warn!("Rejecting {} from {}: coordinator is not running", id, addr);
        return;
    }
    log::debug!("Client '{}' is {}", id, addr);

    let mut writer = tokio::spawn(write_outbound(id, sink, outbound));

    loop {
        tokio::select! {
            frame = stream.next() => {
                let forwarded = match frame {
                    Some(Ok(Message::Text(text))) => coordinator.message(id, Payload::from(text.as_str())),
                    Some(Ok(Message::Binary(bytes))) => coordinator.message(id, Payload::Binary(bytes)),
                    // Control frames are answered by the websocket layer.
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = coordinator.close(id);
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = coordinator.error(id, e.to_string());
                        break;
                    }
                };
                if forwarded.is_err() {
                    break;
                }
            }
            _ = &mut writer => {
                let _ = coordinator.close(id);
                break;
            }
        }
    }
}

async fn write_outbound<K>(id: ConnectionId, mut sink: K, mut outbound: OutboundQueue)
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Deliver(payload) => {
                if let Err(e) = sink.send(to_message(payload)).await {
                    log::debug!("Write to '{}' failed: {}", id, e);
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

fn to_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(Utf8Bytes::from(&*text)),
        Payload::Binary(bytes) => Message::Binary(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{spawn, LifecycleCoordinator};
    use futures_util::{sink, stream};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn peer_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn transport_error(message: &str) -> axum::Error {
        axum::Error::new(std::io::Error::other(message.to_string()))
    }

    /// Sink that keeps every frame written to it.
    fn recording_sink(frames: Arc<Mutex<Vec<Message>>>) -> impl Sink<Message, Error = axum::Error> + Unpin + Send + 'static {
        Box::pin(sink::unfold(frames, |frames, frame: Message| async move {
            frames.lock().unwrap().push(frame);
            Ok::<_, axum::Error>(frames)
        }))
    }

    #[tokio::test]
    async fn writer_failure_closes_the_connection() {
        let shutdown = CancellationToken::new();
        let (coordinator, _task) = spawn(LifecycleCoordinator::new(), shutdown.clone());

        // The peer never sends anything, and writing the snapshot fails.
        let reader = stream::pending::<Result<Message, axum::Error>>();
        let broken = Box::pin(sink::unfold((), |(), _frame: Message| async move {
            Err::<(), _>(transport_error("peer gone"))
        }));

        timeout(
            Duration::from_secs(5),
            drive_connection(ConnectionId::next(), peer_addr(), reader, broken, coordinator.clone()),
        )
        .await
        .expect("connection should end when its writer does");

        assert_eq!(coordinator.status().await.unwrap().clients, 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn read_error_unregisters_and_force_closes() {
        let shutdown = CancellationToken::new();
        let (coordinator, _task) = spawn(LifecycleCoordinator::new(), shutdown.clone());
        let frames = Arc::new(Mutex::new(Vec::new()));

        let reader = stream::iter(vec![
            Ok(Message::Text(Utf8Bytes::from_static("draft"))),
            Err(transport_error("connection reset")),
        ]);
        drive_connection(
            ConnectionId::next(),
            peer_addr(),
            reader,
            recording_sink(frames.clone()),
            coordinator.clone(),
        )
        .await;

        let status = coordinator.status().await.unwrap();
        assert_eq!(status.clients, 0);
        assert_eq!(status.document_bytes, 5);

        // Snapshot first, then the close frame from the forced close.
        timeout(Duration::from_secs(5), async {
            while !frames.lock().unwrap().iter().any(|f| matches!(f, Message::Close(_))) {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("forced close never reached the socket");
        assert!(matches!(&frames.lock().unwrap()[0], Message::Text(t) if t.as_str() == ""));
        shutdown.cancel();
    }

    #[test]
    fn payload_kind_maps_to_frame_kind() {
        match to_message(Payload::from("buy milk")) {
            Message::Text(text) => assert_eq!(text.as_str(), "buy milk"),
            other => panic!("expected a text frame, got {:?}", other),
        }
        match to_message(Payload::from(vec![1u8, 2, 3])) {
            Message::Binary(bytes) => assert_eq!(&bytes[..], &[1u8, 2, 3]),
            other => panic!("expected a binary frame, got {:?}", other),
        }
    }
}
