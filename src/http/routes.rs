//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::app::{AppState, Command, ControlError};
use crate::players::registry::PlayerUpdate;
use crate::players::{OperatorError, PlayerId};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::SessionSnapshot;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let cors = match &state.config.client_origin {
        Some(origins) => {
            let allowed_origins: Vec<header::HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE])
        }
        None => CorsLayer::permissive(),
    };

    let player_routes = Router::new()
        .route("/players", post(add_player_handler).delete(remove_last_player_handler))
        .route("/players/connect", post(connect_all_handler))
        .route(
            "/players/:id",
            delete(remove_player_handler).patch(update_player_handler),
        )
        .route("/players/:id/connect", post(connect_player_handler))
        .route("/players/:id/calibrate", post(calibrate_handler));

    let session_routes = Router::new()
        .route("/state", get(state_handler))
        .route("/settings", put(update_settings_handler))
        .route("/settings/reset", post(reset_settings_handler))
        .route("/session/start", post(start_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .merge(player_routes)
        .merge(session_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    players: usize,
    connected_players: usize,
    running: bool,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.snapshot();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        players: snapshot.players.len(),
        connected_players: snapshot
            .players
            .iter()
            .filter(|p| p.status == crate::device::ConnectionStatus::Connected)
            .count(),
        running: snapshot.running,
    })
}

async fn state_handler(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.snapshot())
}

// ============================================================================
// Player endpoints
// ============================================================================

async fn add_player_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let snapshot = state.control.send(Command::AddPlayer).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn remove_last_player_handler(
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.control.send(Command::RemovePlayer(None)).await?))
}

async fn remove_player_handler(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.control.send(Command::RemovePlayer(Some(id))).await?))
}

#[derive(Deserialize)]
struct UpdatePlayerRequest {
    name: Option<String>,
    #[serde(alias = "ip")]
    address: Option<String>,
    threshold: Option<u8>,
}

async fn update_player_handler(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
    Json(req): Json<UpdatePlayerRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let update = PlayerUpdate {
        name: req.name,
        address: req.address,
        threshold: req.threshold,
    };
    Ok(Json(state.control.send(Command::UpdatePlayer { id, update }).await?))
}

async fn connect_all_handler(
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.control.send(Command::Connect(None)).await?))
}

async fn connect_player_handler(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.control.send(Command::Connect(Some(id))).await?))
}

async fn calibrate_handler(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.control.send(Command::Calibrate(id)).await?))
}

// ============================================================================
// Settings and session endpoints
// ============================================================================

#[derive(Deserialize)]
struct SettingsRequest {
    dark: Option<bool>,
    difficulty: Option<usize>,
}

async fn update_settings_handler(
    State(state): State<AppState>,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let command = Command::UpdateSettings {
        dark: req.dark,
        difficulty: req.difficulty,
    };
    Ok(Json(state.control.send(command).await?))
}

async fn reset_settings_handler(
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.control.send(Command::ResetSettings).await?))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StartRequest {
    /// Start even when some guns are not connected
    force: bool,
}

async fn start_handler(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.control.send(Command::Start { force: req.force }).await?))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Rejected(#[from] OperatorError),

    #[error("Session unavailable")]
    Unavailable,
}

impl From<ControlError> for AppError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Rejected(e) => AppError::Rejected(e),
            ControlError::Unavailable => AppError::Unavailable,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            AppError::Rejected(e) => {
                let status = match e {
                    OperatorError::UnknownPlayer(_) => StatusCode::NOT_FOUND,
                    OperatorError::SessionRunning
                    | OperatorError::AlreadyStarted
                    | OperatorError::PlayersNotConnected
                    | OperatorError::NotConnected(_)
                    | OperatorError::NoSample(_)
                    | OperatorError::InvalidSample(_) => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, e.code())
            }
            AppError::Unavailable => {
                warn!("Control request while the session loop is down");
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
        };

        let body = serde_json::json!({
            "code": code,
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
