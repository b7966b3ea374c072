//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the registry and pipeline for
//! business logic.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::ws::{commentary_ws_handler, events_ws_handler};
use crate::api::AppState;
use crate::error::{BoothError, BoothResult};
use crate::game::board::BoardProjection;
use crate::game::roster::StaticContext;
use crate::game::snapshot::GameId;
use crate::pipeline;
use crate::protocol_constants::{APP_NAME, SERVICE_ID};

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/games", get(list_games).post(start_game))
        .route("/api/games/{game_id}", axum::routing::delete(stop_game))
        .route("/api/games/{game_id}/board", get(game_board))
        .route("/ws", get(commentary_ws_handler))
        .route("/ws/events", get(events_ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - service probe used by subscribers to identify a server.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_ID,
        "name": APP_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "games": state.registry.len(),
        "connections": state.ws_manager.connection_count(),
    }))
}

/// Summary row for the game listing.
#[derive(Serialize)]
struct GameSummary {
    game_id: String,
    away_team: String,
    home_team: String,
    venue: String,
    score: crate::game::snapshot::ScorePair,
    period: u8,
    started_at: u64,
    finished: bool,
    subscribers: usize,
}

/// GET /api/games - active game sessions.
async fn list_games(State(state): State<AppState>) -> Json<Vec<GameSummary>> {
    let mut games = Vec::new();
    for game_id in state.registry.game_ids() {
        let Some(handle) = state.registry.get(&game_id) else {
            continue;
        };
        let ctx = handle.static_context();
        let projection = handle.projection();
        games.push(GameSummary {
            game_id: game_id.to_string(),
            away_team: ctx.away_team.clone(),
            home_team: ctx.home_team.clone(),
            venue: ctx.venue.clone(),
            score: projection.score,
            period: projection.period,
            started_at: handle.started_at(),
            finished: handle.is_finished(),
            subscribers: state.ws_manager.subscribers_for(&game_id),
        });
    }
    Json(games)
}

/// POST /api/games - start a pipeline from a static context payload.
async fn start_game(
    State(state): State<AppState>,
    Json(ctx): Json<StaticContext>,
) -> BoothResult<Json<serde_json::Value>> {
    let game_id = ctx.game_id.clone();
    if state.registry.get(&game_id).is_some() {
        return Err(BoothError::GameAlreadyRunning(game_id.to_string()));
    }

    let handle = pipeline::start_game(state.pipeline_deps.clone(), ctx).await?;
    if !state.registry.insert(handle) {
        return Err(BoothError::GameAlreadyRunning(game_id.to_string()));
    }

    Ok(Json(json!({ "game_id": game_id.to_string() })))
}

/// DELETE /api/games/{game_id} - drain and stop a game session.
async fn stop_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> BoothResult<Json<serde_json::Value>> {
    let game_id = GameId::new(game_id);
    let handle = state
        .registry
        .remove(&game_id)
        .ok_or_else(|| BoothError::GameNotFound(game_id.to_string()))?;

    let grace = {
        let config = state.config.read();
        std::time::Duration::from_secs(config.drain_grace_secs)
    };
    handle.stop(grace).await;
    state.hub.discard(&game_id);

    Ok(Json(json!({ "game_id": game_id.to_string(), "stopped": true })))
}

/// GET /api/games/{game_id}/board - the current Board projection.
async fn game_board(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> BoothResult<Json<BoardProjection>> {
    let game_id = GameId::new(game_id);
    let handle = state
        .registry
        .get(&game_id)
        .ok_or_else(|| BoothError::GameNotFound(game_id.to_string()))?;
    Ok(Json(handle.projection()))
}
