use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use pipeline::SessionStatus;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub message: &'static str,
    pub stopped: bool,
}

pub async fn stop(State(state): State<AppState>) -> Result<Json<StopResponse>, ApiError> {
    let controller = state.controller.clone();
    let stopped = tokio::task::spawn_blocking(move || controller.stop()).await?;

    let message = if stopped {
        "Detection stopped"
    } else {
        "No active detection session"
    };
    Ok(Json(StopResponse { message, stopped }))
}

pub async fn status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.controller.status())
}

pub async fn health() -> &'static str {
    "ok"
}
