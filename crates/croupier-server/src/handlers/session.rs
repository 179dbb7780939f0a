//! Connect, poll and action handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Json;
use serde::Serialize;
use serde_json::Value;

use croupier_gateway::ClientId;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub id: ClientId,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: &'static str,
}

pub const ACTION_FORWARDED: &str = "Action forwarded to game server";

/// `GET /connect`
pub async fn connect(State(state): State<AppState>) -> Result<Json<ConnectResponse>, ApiError> {
    let id = state.gateway.connect().await?;
    Ok(Json(ConnectResponse { id }))
}

/// `GET /update/:id`
pub async fn poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cached = state.gateway.poll(&id)?;
    Ok(Json(cached))
}

/// `POST /action/:id`
///
/// Acknowledges that the write was issued, not that the game server
/// applied it. The body is validated before the session is looked up.
pub async fn action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let Json(action) = body?;
    state.gateway.action(&id, &action)?;
    Ok(Json(ActionResponse {
        status: ACTION_FORWARDED,
    }))
}
