//! Axum web server with WebSocket streaming of layout frames.
//!
//! Reads come from the engine's status watch and the renderer's frame feed.
//! Writes never touch the layout directly: they are queued as engine
//! commands and applied between ticks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use canopy_layout::{GraphNode, Vec2, DEFAULT_SEARCH_LIMIT};
use canopy_transfer::{QueryPeer, TransferError};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::engine::{EngineHandle, EngineStatus, SearchHit};
use crate::error::Error;
use crate::render::{FrameFeed, LayoutFrame};

/// Default result count for peer discovery.
const DISCOVER_LIMIT: usize = 10;

/// Shared application state.
pub struct AppState {
    engine: EngineHandle,
    frames: FrameFeed,
    query: Option<Arc<QueryPeer>>,
}

/// Observation server.
pub struct VisServer {
    state: Arc<AppState>,
}

impl VisServer {
    pub fn new(engine: EngineHandle, frames: FrameFeed) -> Self {
        Self {
            state: Arc::new(AppState {
                engine,
                frames,
                query: None,
            }),
        }
    }

    /// Answer `/api/discover` through the query peer.
    pub fn with_query_peer(self, query: QueryPeer) -> Self {
        let state = AppState {
            engine: self.state.engine.clone(),
            frames: self.state.frames.clone(),
            query: Some(Arc::new(query)),
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Build the router for the server.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(status_handler))
            .route("/api/layout", get(layout_handler))
            .route("/api/search", get(search_handler))
            .route("/api/discover", get(discover_handler))
            .route("/api/drag", post(drag_handler))
            .route("/api/select", post(select_handler))
            .route("/api/recenter", post(recenter_handler))
            .route("/ws", get(ws_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until the listener fails.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Observation server running on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
            Error::Transfer(TransferError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Error::Transfer(_) => StatusCode::BAD_GATEWAY,
            Error::Config { .. } | Error::Layout(_) => StatusCode::BAD_REQUEST,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

async fn layout_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.frames.latest() {
        Some(frame) => Json(frame).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, Error> {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    Ok(Json(state.engine.search(query.q, limit).await?))
}

async fn discover_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<GraphNode>>, Error> {
    let Some(peer) = &state.query else {
        return Err(Error::Transfer(TransferError::Closed));
    };
    let limit = query.limit.unwrap_or(DISCOVER_LIMIT);
    let client = peer.client().await?;
    Ok(Json(client.discover(&query.q, limit).await?))
}

#[derive(Deserialize)]
struct DragRequest {
    id: String,
    x: f64,
    y: f64,
}

async fn drag_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DragRequest>,
) -> Result<StatusCode, Error> {
    state.engine.drag(req.id, Vec2::new(req.x, req.y)).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct SelectRequest {
    #[serde(default)]
    id: Option<String>,
}

async fn select_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectRequest>,
) -> Result<StatusCode, Error> {
    state.engine.select(req.id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn recenter_handler(State(state): State<Arc<AppState>>) -> Result<StatusCode, Error> {
    state.engine.recenter().await?;
    Ok(StatusCode::ACCEPTED)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Drag {
        id: String,
        x: f64,
        y: f64,
    },
    Select {
        #[serde(default)]
        id: Option<String>,
    },
    Recenter,
    Search {
        q: String,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    GetStatus,
    GetLayout,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsEvent {
    Layout(Arc<LayoutFrame>),
    Status(EngineStatus),
    SearchResults { hits: Vec<SearchHit> },
    Error { message: String },
}

async fn send_event(socket: &mut WebSocket, event: &WsEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            debug!(error = %e, "Could not encode event");
            true
        }
    }
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let mut frames = state.frames.subscribe();

    // Initial state
    if let Some(frame) = state.frames.latest() {
        if !send_event(&mut socket, &WsEvent::Layout(frame)).await {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let event = match serde_json::from_str::<WsCommand>(text.as_str()) {
                        Ok(cmd) => handle_ws_command(&state, cmd).await,
                        Err(e) => Some(WsEvent::Error { message: e.to_string() }),
                    };
                    if let Some(event) = event {
                        if !send_event(&mut socket, &event).await {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if !send_event(&mut socket, &WsEvent::Layout(frame)).await {
                        break;
                    }
                }
                // Only the newest layout matters to a viewer.
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "WebSocket client lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("WebSocket client gone");
}

/// Apply a WebSocket command. Mutations are acknowledged by the frames they
/// cause and only answer on failure; queries answer directly.
async fn handle_ws_command(state: &AppState, cmd: WsCommand) -> Option<WsEvent> {
    let sent = match cmd {
        WsCommand::Drag { id, x, y } => state.engine.drag(id, Vec2::new(x, y)).await,
        WsCommand::Select { id } => state.engine.select(id).await,
        WsCommand::Recenter => state.engine.recenter().await,
        WsCommand::Search { q, limit } => {
            return Some(match state.engine.search(q, limit).await {
                Ok(hits) => WsEvent::SearchResults { hits },
                Err(e) => WsEvent::Error { message: e.to_string() },
            });
        }
        WsCommand::GetStatus => return Some(WsEvent::Status(state.engine.status())),
        WsCommand::GetLayout => {
            // Nothing rendered yet: status tells the client why.
            return Some(match state.frames.latest() {
                Some(frame) => WsEvent::Layout(frame),
                None => WsEvent::Status(state.engine.status()),
            });
        }
    };
    sent.err().map(|e| WsEvent::Error { message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_commands_decode() {
        let drag: WsCommand =
            serde_json::from_str(r#"{"type":"drag","id":"a","x":1.5,"y":-2}"#).unwrap();
        assert!(matches!(drag, WsCommand::Drag { ref id, x, .. } if id == "a" && x == 1.5));

        let clear: WsCommand = serde_json::from_str(r#"{"type":"select"}"#).unwrap();
        assert!(matches!(clear, WsCommand::Select { id: None }));

        let search: WsCommand = serde_json::from_str(r#"{"type":"search","q":"parse"}"#).unwrap();
        assert!(matches!(search, WsCommand::Search { limit: 50, .. }));
    }

    #[test]
    fn ws_events_are_tagged() {
        let json = serde_json::to_value(WsEvent::SearchResults { hits: vec![] }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "search_results", "hits": []}));
    }
}
