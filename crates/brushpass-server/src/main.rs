//! Pass the Brush WebSocket Server
//!
//! Hosts drawing rooms over WebSocket. Every connection drives its own room
//! client against a shared in-memory store; see [`protocol`] for the frames.

mod config;
mod connection;
mod protocol;

use axum::{
    Json, Router,
    extract::{Path, State, ws::WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use brushpass_core::{ChangeBus, Coordinator, GameConfig, GameError, MemoryIdentities, MemoryStore, Phase, SystemClock};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::ServerConfig;

/// Shared application state
pub struct AppState {
    pub coordinator: Coordinator,
    pub bus: ChangeBus,
    pub identities: Arc<MemoryIdentities>,
}

impl AppState {
    pub fn new(config: GameConfig) -> Self {
        let bus = ChangeBus::default();
        let clock = Arc::new(SystemClock);
        let store = Arc::new(MemoryStore::with_clock(bus.clone(), clock.clone()));
        let identities = Arc::new(MemoryIdentities::new());
        let coordinator = Coordinator::new(store, identities.clone(), clock, config);
        Self {
            coordinator,
            bus,
            identities,
        }
    }
}

/// Lobby view of a room.
#[derive(Debug, Serialize)]
struct RoomSummary {
    code: String,
    phase: Phase,
    players: usize,
    spectators: usize,
    capacity: usize,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brushpass_server=info,brushpass_core=info,tower_http=info".into()),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(config.game.clone()));
    let app = router(state);

    info!("Pass the Brush server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Cannot bind {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/rooms/{code}", get(room_summary))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Pass the Brush server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// Look up a room by join code before joining it.
async fn room_summary(
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoomSummary>, (StatusCode, String)> {
    let room = state.coordinator.find_room(&code).await.map_err(|e| match e {
        GameError::RoomNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        other => (StatusCode::SERVICE_UNAVAILABLE, other.to_string()),
    })?;
    let roster = state
        .coordinator
        .roster(room.id)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    let players = roster.seated_count();
    Ok(Json(RoomSummary {
        code: room.code,
        phase: room.phase,
        players,
        spectators: roster.players().len() - players,
        capacity: state.coordinator.config().max_players,
    }))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    async fn serve() -> std::net::SocketAddr {
        let state = Arc::new(AppState::new(GameConfig::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_session() {
        let addr = serve().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        ws.send(Message::Text(r#"{"type":"hello","identity":"ada","name":"Ada"}"#.into()))
            .await
            .unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "welcome");

        ws.send(Message::Text("not json".into())).await.unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "error");

        ws.send(Message::Text(r#"{"type":"create_room"}"#.into())).await.unwrap();
        let room = loop {
            let frame = next_json(&mut ws).await;
            if frame["type"] == "room" {
                break frame;
            }
        };
        assert_eq!(room["room"]["phase"], "waiting");
        assert_eq!(room["room"]["host"], "ada");

        let code = room["room"]["code"].as_str().unwrap().to_string();
        let body = http_get(addr, &format!("/rooms/{}", code)).await;
        assert!(body.contains("\"players\":1"), "unexpected summary: {}", body);
    }

    /// Minimal HTTP/1.1 GET over a raw socket.
    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", path, addr);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }
}
