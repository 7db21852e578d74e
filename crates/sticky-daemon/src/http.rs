use crate::core::PlayerEvent;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use sticky_player::protocol::{Command, PlayerView, PROTOCOL_VERSION};
use sticky_player::state::StateManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
}

#[derive(Serialize)]
struct ApiVersion {
    protocol_version: u32,
    daemon: &'static str,
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<PlayerEvent>) -> Router {
    Router::new()
        .route("/api/version", get(get_version))
        .route("/api/state", get(get_state))
        .route("/api/command", post(post_command))
        .layer(CorsLayer::permissive())
        .with_state(HttpState {
            state_manager,
            event_tx,
        })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_version() -> Json<ApiVersion> {
    Json(ApiVersion {
        protocol_version: PROTOCOL_VERSION,
        daemon: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerView> {
    Json(state.state_manager.get_view().await)
}

/// Commands are queued for the event loop; the effect shows up in the next
/// published state.  `GetState` is answered with the current view.
async fn post_command(State(state): State<HttpState>, Json(cmd): Json<Command>) -> Response {
    if cmd == Command::GetState {
        return Json(state.state_manager.get_view().await).into_response();
    }
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(PlayerEvent::Command(cmd)).await.is_err() {
        error!("Failed to queue command");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    StatusCode::ACCEPTED.into_response()
}
